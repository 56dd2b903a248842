//! The five moves and the payoff relation between them.
//!
//! Every move beats exactly two others and loses to the remaining two:
//!
//! | move       | beats              |
//! |------------|--------------------|
//! | `ROCK`     | `SCISSORS`, `LIZARD` |
//! | `PAPER`    | `ROCK`, `SPOCK`      |
//! | `SCISSORS` | `PAPER`, `LIZARD`    |
//! | `LIZARD`   | `PAPER`, `SPOCK`     |
//! | `SPOCK`    | `ROCK`, `SCISSORS`   |

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MatchError;

/// One of the five symmetric options of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Move {
    /// Crushes scissors, crushes lizard.
    Rock,
    /// Covers rock, disproves Spock.
    Paper,
    /// Cuts paper, decapitates lizard.
    Scissors,
    /// Eats paper, poisons Spock.
    Lizard,
    /// Vaporizes rock, smashes scissors.
    Spock,
}

/// Returned when a token does not name one of the five moves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{token}' is not a valid move")]
pub struct InvalidMove {
    /// The offending token, as received.
    pub token: String,
}

impl Move {
    /// All moves, in canonical order.
    pub const ALL: [Move; 5] = [
        Move::Rock,
        Move::Paper,
        Move::Scissors,
        Move::Lizard,
        Move::Spock,
    ];

    /// Substituted by the engine whenever a strategy fails to answer in time.
    pub const DEFAULT: Move = Move::Rock;

    /// The two moves this one beats.
    pub fn beats(self) -> [Move; 2] {
        use Move::*;
        match self {
            Rock => [Scissors, Lizard],
            Paper => [Rock, Spock],
            Scissors => [Paper, Lizard],
            Lizard => [Paper, Spock],
            Spock => [Rock, Scissors],
        }
    }

    /// The two moves that beat this one.
    pub fn beaten_by(self) -> [Move; 2] {
        let mut found = [self; 2];
        let mut n = 0;
        for other in Move::ALL {
            if other.beats().contains(&self) {
                found[n] = other;
                n += 1;
            }
        }
        debug_assert_eq!(n, 2);
        found
    }

    /// Upper-case name, as written to logs and sent over the wire.
    pub fn name(self) -> &'static str {
        match self {
            Move::Rock => "ROCK",
            Move::Paper => "PAPER",
            Move::Scissors => "SCISSORS",
            Move::Lizard => "LIZARD",
            Move::Spock => "SPOCK",
        }
    }
}

impl Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Move {
    type Err = InvalidMove;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Move::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| InvalidMove {
                token: s.to_string(),
            })
    }
}

/// Score deltas of a round: `(delta_a, delta_b)`, each in `{-1, 0, 1}`, summing to zero.
pub type Deltas = (i8, i8);

/// Resolve a round between `a` and `b`.
///
/// The relation is total, so the error branch only fires if the table above was corrupted.
pub fn resolve(a: Move, b: Move) -> Result<Deltas, MatchError> {
    if a == b {
        Ok((0, 0))
    } else if a.beats().contains(&b) {
        Ok((1, -1))
    } else if b.beats().contains(&a) {
        Ok((-1, 1))
    } else {
        Err(MatchError::UnresolvablePair { a, b })
    }
}
