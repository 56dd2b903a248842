//! # RPSLS League
//!
//! Repeated matches of rock-paper-scissors-lizard-spock between pluggable strategies, with a
//! deception mechanic, and logs that replay bit for bit.
//!
//! It provides:
//! - The game itself: the five [`Move`](crate::moves::Move)s and their payoff relation
//! - Deception tokens: a strategy may spend one of a limited budget of tokens to show its
//!   opponent a shadow move instead of the real one. The opponent only ever learns a coarse
//!   [`Bucket`](crate::deception::Bucket) of how many tokens are left.
//! - Reproducible randomness: each side of a match owns one stream derived from the two
//!   identities and a global salt, and it is the only entropy a strategy gets
//! - Fault isolation: every strategy call runs under a timeout, and anything but a malformed
//!   move is replaced by a default answer ([`guard`])
//! - The match state machine ([`MatchEngine`](crate::engine::MatchEngine)) and a
//!   [`ReplayValidator`](crate::replay::ReplayValidator) checking a log against fresh
//!   instances of the strategies that produced it
//! - A bounded pool running many matches at once ([`League`](crate::league::League)), writing
//!   round and match logs to a [`RunJournal`](crate::journal::RunJournal)
//! - Agents running in their own process, confined with Linux cgroups v2 ([`remote`])
//!
//! # Documentation Overview
//!
//! - For the round procedure and the token economy, see the [`engine`] module.
//! - For game parameters, see [`RulesBuilder`](crate::rules::RulesBuilder). For runner
//!   behaviour (isolation, concurrency, logging), see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For writing a strategy, see the [`Strategy`](crate::strategy::Strategy) trait and the
//!   [`house`] strategies.
//! - For the log format and replay guarantees, see [`record`] and [`replay`].
//!
//! # Usage Example
//!
//! ```no_run
//! use std::path::Path;
//! use rpsls_league::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut registry = StrategyRegistry::new();
//!     for name in ["uniform", "frequency_counter", "bluffer"] {
//!         registry.register(name, move || house::by_name(name))?;
//!     }
//!
//!     let rules = RulesBuilder::from_env().build()?;
//!     let config = Configuration::from_env();
//!     let league = League::new(registry.clone(), rules.clone(), config)?;
//!
//!     let pairings = vec![
//!         Pairing::new("uniform", "bluffer"),
//!         Pairing::new("bluffer", "frequency_counter"),
//!     ];
//!     let journal = RunJournal::create(Path::new("results"), &rules)?;
//!     for outcome in league.run(&pairings, Some(&journal)) {
//!         match outcome.result {
//!             Ok(summary) => println!("{}: {}-{}", outcome.pairing, summary.score_a, summary.score_b),
//!             Err(e) => println!("{}: {e:#}", outcome.pairing),
//!         }
//!     }
//!     journal.close()?;
//!
//!     // Every logged match replays with fresh instances
//!     let validator = ReplayValidator::new(&rules, Isolation::Worker);
//!     let log = std::io::BufReader::new(std::fs::File::open("results/rounds.jsonl")?);
//!     for log in split_matches(RecordReader::new(log)) {
//!         let report = validator.validate_registered(&registry, log?)?;
//!         println!("{} rounds replayed", report.rounds);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Example Strategy
//!
//! ```
//! use rpsls_league::prelude::*;
//!
//! /// Plays whatever beats the opponent's last visible move, and bluffs when it is cheap.
//! struct Beater;
//!
//! impl Strategy for Beater {
//!     fn produce_move(&mut self, view: &StateView, entropy: &mut dyn Entropy) -> anyhow::Result<Move> {
//!         Ok(match view.opponent_last_visible {
//!             Some(last) => last.beaten_by()[entropy.choose_index(2)],
//!             None => Move::Spock,
//!         })
//!     }
//!
//!     fn request_shadow(&mut self, view: &StateView) -> anyhow::Result<ShadowRequest> {
//!         Ok(if view.opponent_bucket == Bucket::Empty {
//!             ShadowRequest::show(Move::Rock)
//!         } else {
//!             ShadowRequest::none()
//!         })
//!     }
//! }
//! ```
//!
//! ## Agent Requirements
//!
//! - Strategies must only use the [`Entropy`](crate::rng::Entropy) they are handed
//! - Strategy calls must terminate within the configured action timeout
//! - Agent processes talk to the engine over TCP, one JSON object per line (see [`remote`])
#![warn(missing_docs)]

pub use anyhow;

pub mod configuration;
pub mod deception;
pub mod engine;
pub mod error;
pub mod guard;
pub mod house;
pub mod journal;
pub mod league;
mod logger;
pub mod moves;
pub mod record;
pub mod remote;
pub mod replay;
pub mod rng;
pub mod rules;
mod sandbox;
pub mod strategy;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use rpsls_league::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration) and
///   [`RulesBuilder`](crate::rules::RulesBuilder)
/// - [`League`](crate::league::League), [`MatchEngine`](crate::engine::MatchEngine) and
///   [`ReplayValidator`](crate::replay::ReplayValidator)
/// - the [`Strategy`](crate::strategy::Strategy) contract and everything it mentions
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::deception::{Bucket, ShadowRequest};
    pub use crate::engine::MatchEngine;
    pub use crate::guard::Isolation;
    pub use crate::house;
    pub use crate::journal::RunJournal;
    pub use crate::league::{League, MatchOutcome, Pairing};
    pub use crate::moves::Move;
    pub use crate::record::{split_matches, MatchSummary, RecordReader, RoundRecord};
    pub use crate::replay::{ReplayError, ReplayValidator};
    pub use crate::rng::Entropy;
    pub use crate::rules::{Rules, RulesBuilder};
    pub use crate::strategy::{StateView, Strategy, StrategyRegistry};
}
