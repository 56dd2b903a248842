//! Conditions that end a match.
//!
//! A timeout or a fault inside a strategy never shows up here: the [`guard`](crate::guard)
//! swallows those and substitutes a default answer. What is left is fatal to the match it
//! happened in, and to that match only.

use thiserror::Error;

use crate::moves::Move;

/// Fatal match failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// A strategy answered with something that is not one of the five moves.
    #[error("round {round}: '{bot}' produced a malformed move '{token}'")]
    MalformedMove {
        /// Round in which it happened (1-based).
        round: u32,
        /// Identity of the offending strategy.
        bot: String,
        /// What was received instead of a move.
        token: String,
    },
    /// The win relation failed to decide a pair. Indicates a corrupted relation.
    #[error("unresolvable move pair: {a} vs {b}")]
    UnresolvablePair {
        /// Move of side A.
        a: Move,
        /// Move of side B.
        b: Move,
    },
}
