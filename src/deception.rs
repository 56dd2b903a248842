//! Deception tokens and the coarse buckets that are all an opponent ever learns about them.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::moves::Move;

/// Ordinal classification of a remaining token count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bucket {
    /// At or above the high threshold.
    High,
    /// At or above the medium threshold.
    Medium,
    /// At or above the low threshold.
    Low,
    /// Below the low threshold, i.e. no token left.
    Empty,
}

impl Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Bucket::High => "HIGH",
            Bucket::Medium => "MEDIUM",
            Bucket::Low => "LOW",
            Bucket::Empty => "EMPTY",
        };
        f.write_str(s)
    }
}

/// Descending thresholds used to classify token counts. `EMPTY` covers everything below `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketThresholds {
    /// Smallest count classified as [`Bucket::High`].
    pub high: u32,
    /// Smallest count classified as [`Bucket::Medium`].
    pub medium: u32,
    /// Smallest count classified as [`Bucket::Low`].
    pub low: u32,
}

impl Default for BucketThresholds {
    fn default() -> Self {
        Self {
            high: 40,
            medium: 20,
            low: 1,
        }
    }
}

impl BucketThresholds {
    /// Classify `tokens_left`.
    pub fn classify(&self, tokens_left: u32) -> Bucket {
        if tokens_left >= self.high {
            Bucket::High
        } else if tokens_left >= self.medium {
            Bucket::Medium
        } else if tokens_left >= self.low {
            Bucket::Low
        } else {
            Bucket::Empty
        }
    }

    /// Strictly descending, and only an exhausted pool is `EMPTY`.
    pub(crate) fn is_valid(&self) -> bool {
        self.high > self.medium && self.medium > self.low && self.low > 0
    }
}

/// Per-side, per-match token counter. Never negative, never refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPool {
    budget: u32,
    remaining: u32,
}

impl TokenPool {
    /// A full pool.
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            remaining: budget,
        }
    }

    /// Tokens left.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Tokens spent so far.
    pub fn used(&self) -> u32 {
        self.budget - self.remaining
    }

    /// No token left.
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Spend one token. Returns `false`, and spends nothing, when the pool is empty.
    pub fn spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// `used / max(1, budget)`.
    pub fn efficiency(&self) -> f64 {
        f64::from(self.used()) / f64::from(self.budget.max(1))
    }
}

/// What a strategy asks for after choosing its real move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShadowRequest {
    /// Whether a substitution is wanted this round.
    pub wants_shadow: bool,
    /// Move to show the opponent instead of the real one.
    pub shadow_move: Option<Move>,
}

impl ShadowRequest {
    /// No substitution.
    pub fn none() -> Self {
        Self::default()
    }

    /// Ask to show `shadow` instead of the real move.
    pub fn show(shadow: Move) -> Self {
        Self {
            wants_shadow: true,
            shadow_move: Some(shadow),
        }
    }

    /// The shadow move if this request is a real attempt against `pool`: wanted, funded and
    /// complete. Exactly the attempts for which a rejection draw is taken.
    pub fn attempt(&self, pool: &TokenPool) -> Option<Move> {
        if !self.wants_shadow || pool.is_empty() {
            return None;
        }
        self.shadow_move
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_buckets() {
        let t = BucketThresholds::default();
        assert_eq!(t.classify(50), Bucket::High);
        assert_eq!(t.classify(40), Bucket::High);
        assert_eq!(t.classify(39), Bucket::Medium);
        assert_eq!(t.classify(20), Bucket::Medium);
        assert_eq!(t.classify(15), Bucket::Low);
        assert_eq!(t.classify(1), Bucket::Low);
        assert_eq!(t.classify(0), Bucket::Empty);
    }

    #[test]
    fn thresholds_must_descend() {
        assert!(BucketThresholds::default().is_valid());
        assert!(!BucketThresholds {
            high: 20,
            medium: 20,
            low: 1
        }
        .is_valid());
        assert!(!BucketThresholds {
            high: 40,
            medium: 20,
            low: 0
        }
        .is_valid());
    }

    #[test]
    fn pool_never_goes_negative() {
        let mut pool = TokenPool::new(2);
        assert!(pool.spend());
        assert!(pool.spend());
        assert!(!pool.spend());
        assert_eq!(pool.remaining(), 0);
        assert_eq!(pool.used(), 2);
        assert_eq!(pool.efficiency(), 1.0);
    }

    #[test]
    fn empty_budget_has_zero_efficiency() {
        let mut pool = TokenPool::new(0);
        assert!(!pool.spend());
        assert_eq!(pool.efficiency(), 0.0);
    }

    #[test]
    fn only_funded_complete_requests_are_attempts() {
        let full = TokenPool::new(1);
        let empty = TokenPool::new(0);
        assert_eq!(ShadowRequest::show(Move::Spock).attempt(&full), Some(Move::Spock));
        assert_eq!(ShadowRequest::show(Move::Spock).attempt(&empty), None);
        assert_eq!(ShadowRequest::none().attempt(&full), None);
        let incomplete = ShadowRequest {
            wants_shadow: true,
            shadow_move: None,
        };
        assert_eq!(incomplete.attempt(&full), None);
    }
}
