//! Re-running a logged match to prove the log was produced by the strategies it names.
//!
//! The validator re-derives both streams from the logged identities and the rules' salt,
//! then re-simulates every round with fresh strategy instances. What each side is told about
//! its opponent comes from the log: the opponent's last visible move is the logged one, and
//! the opponent's bucket is computed from a token count tracked through the logged shadow
//! flags. Each side's own real moves are recomputed and must match the log exactly.
//!
//! Shadow requests are re-issued so the strategies go through the same calls as in the
//! recorded match, and a funded request re-consumes its rejection draw so the stream stays
//! aligned. The draw is not used to decide anything: the logged flag drives the token
//! bookkeeping.
//!
//! Logs are consumed as a stream, one record at a time.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, instrument};

use crate::{
    engine::{roll_shadow, Side},
    error::MatchError,
    guard::{Contestant, ExecutionGuard, Isolation},
    moves::{resolve, Move},
    record::{MatchLog, MatchSummary, RoundRecord},
    rng::derive_streams,
    rules::Rules,
    strategy::{StateView, Strategy, StrategyRegistry},
};

/// Why a log failed to replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A recomputed real move differs from the logged one.
    #[error("round {round} of {bot_a} vs {bot_b}: '{bot}' logged {logged} but replays {recomputed}")]
    Divergence {
        /// Round of the divergence.
        round: u32,
        /// Identity of side A.
        bot_a: String,
        /// Identity of side B.
        bot_b: String,
        /// Side whose move diverged.
        bot: String,
        /// Real move in the log.
        logged: Move,
        /// Real move produced by the replay.
        recomputed: Move,
    },
    /// A logged shadow could not have happened.
    #[error("round {round}: shadow of '{bot}' does not replay: {reason}")]
    ShadowDivergence {
        /// Round of the shadow.
        round: u32,
        /// Side that shadowed.
        bot: String,
        /// Why it was impossible.
        reason: String,
    },
    /// The log contradicts itself or the rules.
    #[error("round {round}: inconsistent log: {reason}")]
    InconsistentLog {
        /// Round of the record.
        round: u32,
        /// What is inconsistent.
        reason: String,
    },
    /// A record names another pair than the one being replayed.
    #[error("round {round}: expected {expected}, found {found}")]
    IdentityMismatch {
        /// Round of the record.
        round: u32,
        /// `"a vs b"` being replayed.
        expected: String,
        /// `"a vs b"` found in the record.
        found: String,
    },
    /// The log ended before the last round.
    #[error("log ends after {found} of {expected} rounds")]
    Truncated {
        /// Rounds the rules ask for.
        expected: u32,
        /// Rounds found in the log.
        found: u32,
    },
    /// A line is not a record, or there is no record at all.
    #[error("line {line}: {reason}")]
    MalformedLog {
        /// 1-based, `0` when the problem is not tied to a line.
        line: usize,
        /// Why the line could not be read.
        reason: String,
    },
    /// A persisted summary disagrees with the replayed match.
    #[error("summary field {field}: logged {logged}, replayed {recomputed}")]
    SummaryMismatch {
        /// Name of the summary field.
        field: &'static str,
        /// Value in the persisted summary.
        logged: String,
        /// Value from the replay.
        recomputed: String,
    },
    /// The replayed match itself failed.
    #[error(transparent)]
    Match(#[from] MatchError),
    /// Reading the log failed.
    #[error("could not read log: {0}")]
    Io(#[from] std::io::Error),
}

/// What a successful replay recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    /// Rounds replayed.
    pub rounds: u32,
    /// Summary rebuilt from the replay, comparable to a persisted one.
    pub summary: MatchSummary,
}

/// Checks logs against fresh strategy instances.
#[derive(Debug, Clone)]
pub struct ReplayValidator {
    rules: Rules,
    guard: ExecutionGuard,
}

impl ReplayValidator {
    /// Validator for logs recorded under `rules`.
    pub fn new(rules: &Rules, isolation: Isolation) -> Self {
        Self {
            rules: rules.clone(),
            guard: ExecutionGuard::new(rules.action_timeout(), isolation),
        }
    }

    /// Replay the match `bot_a` vs `bot_b` from `records`.
    ///
    /// # Errors
    /// The first divergence or inconsistency found, or the log ended early.
    #[instrument(skip(self, strategy_a, strategy_b, records))]
    pub fn validate<I>(
        &self,
        bot_a: &str,
        strategy_a: Box<dyn Strategy>,
        bot_b: &str,
        strategy_b: Box<dyn Strategy>,
        records: I,
    ) -> Result<ReplayReport, ReplayError>
    where
        I: IntoIterator<Item = Result<RoundRecord, ReplayError>>,
    {
        let (stream_a, stream_b) = derive_streams(bot_a, bot_b, self.rules.seed_salt());
        let budget = self.rules.token_budget();
        let mut sides = [
            Side::new(Contestant::new(bot_a, strategy_a, stream_a), budget),
            Side::new(Contestant::new(bot_b, strategy_b, stream_b), budget),
        ];

        let mut replayed = 0;
        for record in records {
            let record = record?;
            let round = replayed + 1;
            if round > self.rules.rounds() {
                return Err(ReplayError::InconsistentLog {
                    round,
                    reason: format!("the rules only have {} rounds", self.rules.rounds()),
                });
            }
            self.check_header(&record, round, bot_a, bot_b)?;
            self.replay_round(&mut sides, &record)?;
            replayed = round;
        }

        if replayed == 0 {
            return Err(ReplayError::MalformedLog {
                line: 0,
                reason: "no round in log".to_string(),
            });
        }
        if replayed < self.rules.rounds() {
            return Err(ReplayError::Truncated {
                expected: self.rules.rounds(),
                found: replayed,
            });
        }

        let [a, b] = &sides;
        let summary = MatchSummary {
            bot_a: bot_a.to_string(),
            bot_b: bot_b.to_string(),
            score_a: a.score,
            score_b: b.score,
            tokens_used_a: a.pool.used(),
            tokens_used_b: b.pool.used(),
            shadow_efficiency_a: a.pool.efficiency(),
            shadow_efficiency_b: b.pool.efficiency(),
            moves_a: a.moves.clone(),
            moves_b: b.moves.clone(),
        };
        info!(rounds = replayed, "replay successful");
        Ok(ReplayReport {
            rounds: replayed,
            summary,
        })
    }

    /// Replay `log` with fresh instances pulled from `registry`.
    pub fn validate_registered(
        &self,
        registry: &StrategyRegistry,
        log: MatchLog,
    ) -> anyhow::Result<ReplayReport> {
        let strategy_a = registry.instantiate(&log.bot_a)?;
        let strategy_b = registry.instantiate(&log.bot_b)?;
        let report = self.validate(
            &log.bot_a,
            strategy_a,
            &log.bot_b,
            strategy_b,
            log.rounds.into_iter().map(Ok),
        )?;
        Ok(report)
    }

    /// Compare a persisted summary with a replay of the same match.
    ///
    /// # Errors
    /// The first field that differs.
    pub fn check_summary(report: &ReplayReport, logged: &MatchSummary) -> Result<(), ReplayError> {
        fn same<T: PartialEq + std::fmt::Debug>(
            field: &'static str,
            logged: &T,
            recomputed: &T,
        ) -> Result<(), ReplayError> {
            if logged == recomputed {
                return Ok(());
            }
            Err(ReplayError::SummaryMismatch {
                field,
                logged: format!("{logged:?}"),
                recomputed: format!("{recomputed:?}"),
            })
        }

        let r = &report.summary;
        same("bot_a", &logged.bot_a, &r.bot_a)?;
        same("bot_b", &logged.bot_b, &r.bot_b)?;
        same("score_a", &logged.score_a, &r.score_a)?;
        same("score_b", &logged.score_b, &r.score_b)?;
        same("tokens_used_a", &logged.tokens_used_a, &r.tokens_used_a)?;
        same("tokens_used_b", &logged.tokens_used_b, &r.tokens_used_b)?;
        same("shadow_efficiency_a", &logged.shadow_efficiency_a, &r.shadow_efficiency_a)?;
        same("shadow_efficiency_b", &logged.shadow_efficiency_b, &r.shadow_efficiency_b)?;
        same::<BTreeMap<Move, u32>>("moves_a", &logged.moves_a, &r.moves_a)?;
        same::<BTreeMap<Move, u32>>("moves_b", &logged.moves_b, &r.moves_b)
    }

    fn check_header(
        &self,
        record: &RoundRecord,
        round: u32,
        bot_a: &str,
        bot_b: &str,
    ) -> Result<(), ReplayError> {
        if record.bot_a != bot_a || record.bot_b != bot_b {
            return Err(ReplayError::IdentityMismatch {
                round,
                expected: format!("{bot_a} vs {bot_b}"),
                found: format!("{} vs {}", record.bot_a, record.bot_b),
            });
        }
        if record.round != round {
            return Err(ReplayError::InconsistentLog {
                round,
                reason: format!("record is numbered {}", record.round),
            });
        }
        Ok(())
    }

    fn replay_round(&self, sides: &mut [Side; 2], record: &RoundRecord) -> Result<(), ReplayError> {
        let round = record.round;
        let thresholds = self.rules.thresholds();
        let views = [0, 1].map(|i| StateView {
            round,
            opponent_last_visible: sides[1 - i].last_visible,
            own_last_real: sides[i].last_real,
            opponent_bucket: thresholds.classify(sides[1 - i].pool.remaining()),
        });

        let logged_real = [record.a_real, record.b_real];
        let mut real = [Move::DEFAULT; 2];
        for i in 0..2 {
            real[i] = sides[i].real_move(&self.guard, &views[i])?;
            if real[i] != logged_real[i] {
                return Err(ReplayError::Divergence {
                    round,
                    bot_a: record.bot_a.clone(),
                    bot_b: record.bot_b.clone(),
                    bot: sides[i].name().to_string(),
                    logged: logged_real[i],
                    recomputed: real[i],
                });
            }
        }

        let requests = [0, 1].map(|i| {
            let side = &mut sides[i];
            self.guard.request_shadow(&mut side.contestant, &views[i])
        });

        let logged_visible = [record.a_visible, record.b_visible];
        let logged_shadow = [record.a_shadow, record.b_shadow];
        let logged_bucket = [record.a_bucket, record.b_bucket];
        for (i, side) in sides.iter_mut().enumerate() {
            let rolled = roll_shadow(
                &mut side.contestant,
                &requests[i],
                &side.pool,
                self.rules.shadow_reject_prob(),
            );
            if logged_shadow[i] {
                let Some((shadow, _)) = rolled else {
                    return Err(ReplayError::ShadowDivergence {
                        round,
                        bot: side.name().to_string(),
                        reason: "logged a shadow where no attempt was possible".to_string(),
                    });
                };
                if shadow != logged_visible[i] {
                    return Err(ReplayError::ShadowDivergence {
                        round,
                        bot: side.name().to_string(),
                        reason: format!(
                            "logged {} shown, replay requests {shadow}",
                            logged_visible[i]
                        ),
                    });
                }
                side.pool.spend();
            } else if logged_visible[i] != real[i] {
                return Err(ReplayError::InconsistentLog {
                    round,
                    reason: format!(
                        "'{}' shows {} without a shadow but played {}",
                        side.name(),
                        logged_visible[i],
                        real[i]
                    ),
                });
            }

            let bucket = thresholds.classify(side.pool.remaining());
            if bucket != logged_bucket[i] {
                return Err(ReplayError::InconsistentLog {
                    round,
                    reason: format!(
                        "'{}' logged bucket {} but has {} tokens left ({bucket})",
                        side.name(),
                        logged_bucket[i],
                        side.pool.remaining()
                    ),
                });
            }
        }

        let (delta_a, delta_b) = resolve(real[0], real[1])?;
        for (i, (side, delta)) in sides.iter_mut().zip([delta_a, delta_b]).enumerate() {
            side.score += i64::from(delta);
            *side.moves.entry(real[i]).or_default() += 1;
            side.last_real = Some(real[i]);
            side.last_visible = Some(logged_visible[i]);
        }
        Ok(())
    }
}
