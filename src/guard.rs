//! Fault-isolating invocation of strategy operations.
//!
//! Every call into a strategy goes through an [`ExecutionGuard`], which gives it a wall-clock
//! budget and turns anything that goes wrong into a default answer. The only failure that
//! crosses the guard is a malformed move ([`InvalidMove`]), because the engine cannot score
//! it.
//!
//! # Isolation backends
//!
//! - [`Isolation::Inline`] runs the call on the caller's thread and measures it. Panics are
//!   caught and late answers are thrown away, but a call that never returns blocks the match
//!   forever: this only detects and penalizes slowness.
//! - [`Isolation::Worker`] runs the calls of each contestant on one long-lived thread and
//!   waits at most the budget for each. A call that runs out of budget is left running and
//!   keeps the contestant's strategy and stream until it returns. Meanwhile every later call
//!   waits, within its own budget, for the strategy to come back: if it does, the call goes
//!   ahead on what is left of the budget, otherwise it answers the default. The match never
//!   waits past the budget, but a runaway computation itself is not stopped.
//!
//! Strategies hosted in a separate process ([`ProcessStrategy`](crate::remote::ProcessStrategy))
//! also kill that process when it misses its deadline, which is the only way to really stop
//! a runaway computation.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::{
    deception::ShadowRequest,
    moves::{InvalidMove, Move},
    rng::{Entropy, RngStream},
    strategy::{StateView, Strategy},
};

/// How strategy calls are isolated from the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Same thread, wall-clock measurement only.
    Inline,
    /// One thread per contestant, left behind on timeout until the call returns.
    #[default]
    Worker,
}

/// A strategy together with the stream it is allowed to draw from.
pub struct Seat {
    strategy: Box<dyn Strategy>,
    entropy: RngStream,
}

/// Counters of how calls ended, for one contestant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    /// Answered within budget.
    pub answered: u32,
    /// Returned an error or panicked.
    pub faults: u32,
    /// Ran past the budget.
    pub timeouts: u32,
    /// Not called at all because an earlier call was still running.
    pub unavailable: u32,
}

type Job = Box<dyn FnOnce() + Send>;

/// The thread running a contestant's calls under [`Isolation::Worker`].
///
/// Each job owns the seat while it runs and sends it back on `returned` before its answer.
struct CallThread {
    jobs: Sender<Job>,
    returned: Receiver<Seat>,
    give_back: Sender<Seat>,
}

impl CallThread {
    fn spawn(name: &str) -> std::io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(format!("{name}-calls"))
            .spawn(move || {
                for job in queue {
                    job();
                }
            })?;
        let (give_back, returned) = mpsc::channel();
        Ok(Self {
            jobs,
            returned,
            give_back,
        })
    }
}

/// One side of a match as seen by the guard.
pub struct Contestant {
    name: String,
    seat: Option<Seat>,
    stats: GuardStats,
    calls: Option<CallThread>,
}

impl Contestant {
    /// Seat `strategy` with its own `entropy`.
    pub fn new(name: impl Into<String>, strategy: Box<dyn Strategy>, entropy: RngStream) -> Self {
        Self {
            name: name.into(),
            seat: Some(Seat { strategy, entropy }),
            stats: GuardStats::default(),
            calls: None,
        }
    }

    /// Identity of the strategy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counters so far.
    pub fn stats(&self) -> GuardStats {
        self.stats
    }

    /// `false` while a call that ran out of budget still holds the strategy.
    pub fn is_seated(&self) -> bool {
        self.seat.is_some()
    }

    /// Draw a uniform `[0,1)` value from this contestant's stream, on the engine's side.
    /// `None` while the strategy is away.
    pub fn draw_unit(&mut self) -> Option<f64> {
        self.seat.as_mut().map(|seat| seat.entropy.unit())
    }

    /// Values drawn from this contestant's stream so far. `None` while the strategy is away.
    pub fn draws(&self) -> Option<u64> {
        self.seat.as_ref().map(|seat| seat.entropy.draws())
    }
}

/// How a guarded call ended.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation answered within budget.
    Answered(T),
    /// The operation returned an error within budget.
    Rejected(anyhow::Error),
    /// The operation panicked.
    Panicked,
    /// The operation ran past the budget.
    TimedOut,
    /// An earlier call still holds the strategy.
    Unavailable,
}

/// Runs strategy operations under a per-call budget.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionGuard {
    budget: Duration,
    isolation: Isolation,
}

impl ExecutionGuard {
    /// Guard with `budget` per call.
    pub fn new(budget: Duration, isolation: Isolation) -> Self {
        Self { budget, isolation }
    }

    /// Time allowed for one call.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// How calls are run.
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Ask for the real move of this round.
    ///
    /// Faults, panics and timeouts answer [`Move::DEFAULT`].
    ///
    /// # Errors
    /// The strategy reported an [`InvalidMove`].
    pub fn produce_move(
        &self,
        contestant: &mut Contestant,
        view: &StateView,
    ) -> Result<Move, InvalidMove> {
        let view = *view;
        let outcome = self.invoke(contestant, move |seat: &mut Seat| {
            seat.strategy.produce_move(&view, &mut seat.entropy as &mut dyn Entropy)
        });
        match outcome {
            Outcome::Answered(m) => Ok(m),
            Outcome::Rejected(e) => match e.downcast::<InvalidMove>() {
                Ok(invalid) => Err(invalid),
                Err(e) => {
                    warn!(
                        bot = %contestant.name,
                        round = view.round,
                        "move production failed: {e:#}"
                    );
                    Ok(Move::DEFAULT)
                }
            },
            other => {
                report(contestant, view.round, "move production", &other);
                Ok(Move::DEFAULT)
            }
        }
    }

    /// Ask whether the strategy wants a shadow this round. No entropy is handed out.
    ///
    /// Anything but a timely answer means no shadow.
    pub fn request_shadow(&self, contestant: &mut Contestant, view: &StateView) -> ShadowRequest {
        let view = *view;
        let outcome = self.invoke(contestant, move |seat: &mut Seat| {
            seat.strategy.request_shadow(&view)
        });
        match outcome {
            Outcome::Answered(request) => request,
            Outcome::Rejected(e) => {
                warn!(
                    bot = %contestant.name,
                    round = view.round,
                    "shadow request failed: {e:#}"
                );
                ShadowRequest::none()
            }
            other => {
                report(contestant, view.round, "shadow request", &other);
                ShadowRequest::none()
            }
        }
    }

    /// Run `op` on `contestant`'s seat under the budget.
    pub fn invoke<T, F>(&self, contestant: &mut Contestant, op: F) -> Outcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Seat) -> anyhow::Result<T> + Send + 'static,
    {
        let outcome = match self.isolation {
            Isolation::Inline => self.invoke_inline(contestant, op),
            Isolation::Worker => self.invoke_on_worker(contestant, op),
        };
        let stats = &mut contestant.stats;
        match outcome {
            Outcome::Answered(_) => stats.answered += 1,
            Outcome::Rejected(_) | Outcome::Panicked => stats.faults += 1,
            Outcome::TimedOut => stats.timeouts += 1,
            Outcome::Unavailable => stats.unavailable += 1,
        }
        outcome
    }

    fn invoke_inline<T, F>(&self, contestant: &mut Contestant, op: F) -> Outcome<T>
    where
        F: FnOnce(&mut Seat) -> anyhow::Result<T>,
    {
        let Some(seat) = contestant.seat.as_mut() else {
            return Outcome::Unavailable;
        };
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| op(seat)));
        let elapsed = start.elapsed();
        if elapsed > self.budget {
            trace!(bot = %contestant.name, ?elapsed, "late answer discarded");
            return Outcome::TimedOut;
        }
        match result {
            Ok(Ok(value)) => Outcome::Answered(value),
            Ok(Err(e)) => Outcome::Rejected(e),
            Err(_) => Outcome::Panicked,
        }
    }

    fn invoke_on_worker<T, F>(&self, contestant: &mut Contestant, op: F) -> Outcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Seat) -> anyhow::Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + self.budget;
        if contestant.calls.is_none() {
            match CallThread::spawn(&contestant.name) {
                Ok(calls) => contestant.calls = Some(calls),
                Err(e) => {
                    error!(bot = %contestant.name, "could not spawn strategy thread: {e}");
                    return Outcome::Unavailable;
                }
            }
        }
        let Contestant {
            name, seat, calls, ..
        } = contestant;
        let name = name.as_str();
        let Some(worker) = calls.as_ref() else {
            return Outcome::Unavailable;
        };

        if seat.is_none() {
            let wait = deadline.saturating_duration_since(Instant::now());
            match worker.returned.recv_timeout(wait) {
                Ok(back) => {
                    trace!(bot = %name, "late call finished, strategy back");
                    *seat = Some(back);
                }
                Err(_) => return Outcome::Unavailable,
            }
        }
        let Some(mut taken) = seat.take() else {
            return Outcome::Unavailable;
        };

        let (tx, rx) = mpsc::channel();
        let give_back = worker.give_back.clone();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(|| op(&mut taken)));
            let _ = give_back.send(taken);
            // the receiver is gone when the call ran out of budget
            let _ = tx.send(result);
        });
        if worker.jobs.send(job).is_err() {
            error!(bot = %name, "strategy thread is gone");
            *calls = None;
            return Outcome::Unavailable;
        }

        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => {
                // sent before the answer
                *seat = worker.returned.try_recv().ok();
                match result {
                    Ok(Ok(value)) => Outcome::Answered(value),
                    Ok(Err(e)) => Outcome::Rejected(e),
                    Err(_) => Outcome::Panicked,
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    bot = %name,
                    budget = ?self.budget,
                    "call ran out of budget, strategy away until it returns"
                );
                Outcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => Outcome::Panicked,
        }
    }
}

fn report<T>(contestant: &Contestant, round: u32, what: &str, outcome: &Outcome<T>) {
    match outcome {
        Outcome::Panicked => warn!(bot = %contestant.name, round, "{what} panicked"),
        Outcome::TimedOut => warn!(bot = %contestant.name, round, "{what} timed out"),
        Outcome::Unavailable => trace!(bot = %contestant.name, round, "{what} skipped"),
        Outcome::Answered(_) | Outcome::Rejected(_) => {}
    }
}
