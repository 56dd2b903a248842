//! Reference strategies shipped with the league.
//!
//! They only ever use the entropy handed to them, so every match they play replays.

use anyhow::bail;

use crate::{
    deception::{Bucket, ShadowRequest},
    moves::Move,
    rng::Entropy,
    strategy::{StateView, Strategy},
};

/// Always plays the same move and never bluffs.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysPlay(pub Move);

impl Strategy for AlwaysPlay {
    fn produce_move(&mut self, _view: &StateView, _entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
        Ok(self.0)
    }
}

/// Uniformly random play.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl Strategy for Uniform {
    fn produce_move(&mut self, _view: &StateView, entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
        Ok(Move::ALL[entropy.choose_index(Move::ALL.len())])
    }
}

/// Counters the move the opponent has shown most often.
///
/// Plays uniformly during a warm-up, then picks one of the two moves beating the opponent's
/// most frequent visible move. Ties go to the earliest move in canonical order.
#[derive(Debug, Clone, Default)]
pub struct FrequencyCounter {
    seen: [u32; 5],
    observed: u32,
}

impl FrequencyCounter {
    /// Rounds of uniform play before countering.
    pub const WARM_UP: u32 = 10;

    fn most_frequent(&self) -> Move {
        let mut best = 0;
        for (i, count) in self.seen.iter().enumerate() {
            if *count > self.seen[best] {
                best = i;
            }
        }
        Move::ALL[best]
    }
}

impl Strategy for FrequencyCounter {
    fn produce_move(&mut self, view: &StateView, entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
        if let Some(last) = view.opponent_last_visible {
            self.seen[last as usize] += 1;
            self.observed += 1;
        }
        if self.observed < Self::WARM_UP {
            return Ok(Move::ALL[entropy.choose_index(Move::ALL.len())]);
        }
        let counters = self.most_frequent().beaten_by();
        Ok(counters[entropy.choose_index(counters.len())])
    }
}

/// Random play that bluffs once the opponent is low on tokens.
///
/// When the opponent's bucket is `LOW` or `EMPTY`, a shadow is planned with probability
/// [`Bluffer::BLUFF_PROB`], showing a random move.
#[derive(Debug, Clone, Default)]
pub struct Bluffer {
    planned: Option<Move>,
}

impl Bluffer {
    /// Chance of asking for a shadow in any given round.
    pub const BLUFF_PROB: f64 = 0.3;
}

impl Strategy for Bluffer {
    fn produce_move(&mut self, view: &StateView, entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
        let real = Move::ALL[entropy.choose_index(Move::ALL.len())];
        self.planned = None;
        if matches!(view.opponent_bucket, Bucket::Low | Bucket::Empty)
            && entropy.unit() < Self::BLUFF_PROB
        {
            self.planned = Some(Move::ALL[entropy.choose_index(Move::ALL.len())]);
        }
        Ok(real)
    }

    fn request_shadow(&mut self, _view: &StateView) -> anyhow::Result<ShadowRequest> {
        Ok(self
            .planned
            .take()
            .map_or_else(ShadowRequest::none, ShadowRequest::show))
    }
}

/// Names accepted by [`by_name`].
pub const HOUSE_NAMES: [&str; 8] = [
    "always_rock",
    "always_paper",
    "always_scissors",
    "always_lizard",
    "always_spock",
    "uniform",
    "frequency_counter",
    "bluffer",
];

/// Build a house strategy from its name.
pub fn by_name(name: &str) -> anyhow::Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match name {
        "always_rock" => Box::new(AlwaysPlay(Move::Rock)),
        "always_paper" => Box::new(AlwaysPlay(Move::Paper)),
        "always_scissors" => Box::new(AlwaysPlay(Move::Scissors)),
        "always_lizard" => Box::new(AlwaysPlay(Move::Lizard)),
        "always_spock" => Box::new(AlwaysPlay(Move::Spock)),
        "uniform" => Box::new(Uniform),
        "frequency_counter" => Box::<FrequencyCounter>::default(),
        "bluffer" => Box::<Bluffer>::default(),
        _ => bail!("unknown house strategy '{name}'"),
    };
    Ok(strategy)
}
