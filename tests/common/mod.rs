#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::bail;
use rpsls_league::{
    moves::InvalidMove,
    prelude::*,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Trace everything to the test output. Only the first call installs the subscriber.
pub fn init_test_logger() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_test_writer()
        .without_time()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Budget generous enough that a busy test machine never times a call out.
pub const RELAXED_TIMEOUT: Duration = Duration::from_secs(1);

pub fn rules(rounds: u32) -> Rules {
    RulesBuilder::new()
        .with_rounds(rounds)
        .with_action_timeout(RELAXED_TIMEOUT)
        .build()
        .expect("valid rules")
}

/// Always plays the same move, never bluffs.
pub struct Fixed(pub Move);

impl Strategy for Fixed {
    fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        Ok(self.0)
    }
}

/// Always plays a move beating `0`.
pub struct Beater(pub Move);

impl Strategy for Beater {
    fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        Ok(self.0.beaten_by()[0])
    }
}

/// Plays `real` and asks to show `shadow` every round.
pub struct Shadower {
    pub real: Move,
    pub shadow: Move,
}

impl Strategy for Shadower {
    fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        Ok(self.real)
    }

    fn request_shadow(&mut self, _: &StateView) -> anyhow::Result<ShadowRequest> {
        Ok(ShadowRequest::show(self.shadow))
    }
}

/// Random play, recording every view it is given.
pub struct Recorder {
    pub views: Arc<Mutex<Vec<StateView>>>,
}

impl Recorder {
    pub fn new() -> (Self, Arc<Mutex<Vec<StateView>>>) {
        let views = Arc::new(Mutex::new(vec![]));
        (
            Self {
                views: views.clone(),
            },
            views,
        )
    }
}

impl Strategy for Recorder {
    fn produce_move(&mut self, view: &StateView, entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
        self.views.lock().unwrap().push(*view);
        Ok(Move::ALL[entropy.choose_index(5)])
    }
}

/// Never answers within any reasonable budget.
pub struct Sleeper;

impl Strategy for Sleeper {
    fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        thread::sleep(Duration::from_secs(3600));
        Ok(Move::Spock)
    }
}

/// Sleeps through its first move, then plays `mv` without delay.
pub struct SlowOnce {
    nap: Option<Duration>,
    mv: Move,
}

impl SlowOnce {
    pub fn new(nap: Duration, mv: Move) -> Self {
        Self { nap: Some(nap), mv }
    }
}

impl Strategy for SlowOnce {
    fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        if let Some(nap) = self.nap.take() {
            thread::sleep(nap);
        }
        Ok(self.mv)
    }
}

/// Answers a token that is not a move from `round` on.
pub struct Garbage {
    pub round: u32,
}

impl Strategy for Garbage {
    fn produce_move(&mut self, view: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        if view.round >= self.round {
            return Err(InvalidMove {
                token: "DYNAMITE".to_string(),
            }
            .into());
        }
        Ok(Move::Paper)
    }
}

/// Fails every call.
pub struct Faulty;

impl Strategy for Faulty {
    fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
        bail!("cannot decide")
    }

    fn request_shadow(&mut self, _: &StateView) -> anyhow::Result<ShadowRequest> {
        bail!("cannot decide")
    }
}

/// Registry of the house strategies plus a few scripted ones.
pub fn registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for name in ["uniform", "frequency_counter", "bluffer", "always_rock"] {
        registry
            .register(name, move || house::by_name(name))
            .expect("house strategy registers");
    }
    registry
        .register("shadow_paper", || {
            Ok(Box::new(Shadower {
                real: Move::Rock,
                shadow: Move::Paper,
            }) as Box<dyn Strategy>)
        })
        .expect("shadower registers");
    registry
}
