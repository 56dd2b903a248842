//! Parameters of the game itself.
//!
//! Everything that changes what a match computes lives here: the number of rounds, the token
//! economy, the seed salt and the per-action timeout. Two runs with the same [`Rules`] and the
//! same strategies produce the same logs, and a log can only be replayed under the rules it
//! was recorded with. [`Rules::fingerprint`] identifies a rule set in run metadata.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use rpsls_league::rules::RulesBuilder;
//!
//! let rules = RulesBuilder::new()
//!     .with_rounds(1_000)
//!     .with_token_budget(10)
//!     .with_shadow_reject_prob(0.25)
//!     .with_action_timeout(Duration::from_millis(20))
//!     .build()
//!     .unwrap();
//! assert_eq!(rules.rounds(), 1_000);
//! ```
//!
//! Rules may also be read from the environment with [`RulesBuilder::from_env()`].

use std::{env, time::Duration};

use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::deception::BucketThresholds;

/// Rounds per match unless configured otherwise.
pub const DEFAULT_ROUNDS: u32 = 10_000;
/// Deception tokens per side per match unless configured otherwise.
pub const DEFAULT_TOKEN_BUDGET: u32 = 50;
/// Probability that a funded shadow attempt is rejected, unless configured otherwise.
pub const DEFAULT_SHADOW_REJECT_PROB: f64 = 0.10;
/// Global salt mixed into every match seed unless configured otherwise.
pub const DEFAULT_SEED_SALT: &str = "RPSLS_LEAGUE_2026";
/// Per-action timeout unless configured otherwise.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_millis(50);

/// A builder for [`Rules`]. Every field left unset takes its default.
///
/// # Examples
///
/// ```
/// # use rpsls_league::{deception::BucketThresholds, rules::RulesBuilder};
/// let rules = RulesBuilder::new()
///     .with_thresholds(BucketThresholds { high: 8, medium: 4, low: 1 })
///     .with_seed_salt("SPRING_CUP")
///     .build();
/// assert!(rules.is_ok());
/// ```
#[derive(Debug, Default, Clone)]
pub struct RulesBuilder {
    rounds: Option<u32>,
    token_budget: Option<u32>,
    shadow_reject_prob: Option<f64>,
    thresholds: Option<BucketThresholds>,
    seed_salt: Option<String>,
    action_timeout: Option<Duration>,
}

impl RulesBuilder {
    /// Creates a new `RulesBuilder` with every parameter at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `RulesBuilder` configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `LEAGUE_ROUNDS` (u32): rounds per match
    /// - `LEAGUE_TOKEN_BUDGET` (u32): deception tokens per side
    /// - `LEAGUE_SHADOW_REJECT_PROB` (f64): rejection probability of a shadow attempt
    /// - `LEAGUE_BUCKETS` (string): high, medium and low thresholds, e.g. `"40,20,1"`
    /// - `LEAGUE_SEED_SALT` (string): global seed salt
    /// - `LEAGUE_ACTION_TIMEOUT_MS` (u64): timeout per strategy call in milliseconds
    ///
    /// Unset variables keep their default. Unparsable ones are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            let raw = env::var(var).ok()?;
            let parsed = raw.trim().parse().ok();
            if parsed.is_none() {
                warn!("ignoring {var}={raw:?}: not a valid value");
            }
            parsed
        }

        let thresholds = env::var("LEAGUE_BUCKETS").ok().and_then(|raw| {
            parse_thresholds(&raw)
                .inspect_err(|e| warn!("ignoring LEAGUE_BUCKETS={raw:?}: {e:#}"))
                .ok()
        });

        RulesBuilder {
            rounds: parse("LEAGUE_ROUNDS"),
            token_budget: parse("LEAGUE_TOKEN_BUDGET"),
            shadow_reject_prob: parse("LEAGUE_SHADOW_REJECT_PROB"),
            thresholds,
            seed_salt: env::var("LEAGUE_SEED_SALT").ok(),
            action_timeout: parse::<u64>("LEAGUE_ACTION_TIMEOUT_MS").map(Duration::from_millis),
        }
    }

    /// Sets the number of rounds in every match.
    #[must_use]
    pub fn with_rounds(self, rounds: u32) -> Self {
        Self {
            rounds: Some(rounds),
            ..self
        }
    }

    /// Sets the number of deception tokens each side starts a match with.
    #[must_use]
    pub fn with_token_budget(self, budget: u32) -> Self {
        Self {
            token_budget: Some(budget),
            ..self
        }
    }

    /// Sets the probability that a funded shadow attempt is rejected.
    #[must_use]
    pub fn with_shadow_reject_prob(self, prob: f64) -> Self {
        Self {
            shadow_reject_prob: Some(prob),
            ..self
        }
    }

    /// Sets the thresholds used to bucket token counts.
    #[must_use]
    pub fn with_thresholds(self, thresholds: BucketThresholds) -> Self {
        Self {
            thresholds: Some(thresholds),
            ..self
        }
    }

    /// Sets the global salt mixed into every match seed.
    #[must_use]
    pub fn with_seed_salt(self, salt: impl Into<String>) -> Self {
        Self {
            seed_salt: Some(salt.into()),
            ..self
        }
    }

    /// Sets the maximum duration of a single strategy call.
    #[must_use]
    pub fn with_action_timeout(self, timeout: Duration) -> Self {
        Self {
            action_timeout: Some(timeout),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed `Rules`.
    ///
    /// # Errors
    ///
    /// The parameters are impossible: zero rounds, a probability outside `[0, 1]`, thresholds
    /// that do not strictly descend down to a positive `low`, an empty salt or a zero timeout.
    pub fn build(self) -> anyhow::Result<Rules> {
        let rounds = self.rounds.unwrap_or(DEFAULT_ROUNDS);
        if rounds == 0 {
            bail!("a match needs at least one round");
        }

        let shadow_reject_prob = self
            .shadow_reject_prob
            .unwrap_or(DEFAULT_SHADOW_REJECT_PROB);
        if !(0.0..=1.0).contains(&shadow_reject_prob) {
            bail!("shadow rejection probability must be within [0, 1], got {shadow_reject_prob}");
        }

        let thresholds = self.thresholds.unwrap_or_default();
        if !thresholds.is_valid() {
            bail!(
                "bucket thresholds must strictly descend down to a positive low threshold, got {}/{}/{}",
                thresholds.high,
                thresholds.medium,
                thresholds.low
            );
        }

        let seed_salt = self
            .seed_salt
            .unwrap_or_else(|| DEFAULT_SEED_SALT.to_string());
        if seed_salt.is_empty() {
            bail!("seed salt cannot be empty");
        }

        let action_timeout = self.action_timeout.unwrap_or(DEFAULT_ACTION_TIMEOUT);
        if action_timeout.is_zero() {
            bail!("action timeout cannot be zero");
        }

        Ok(Rules {
            rounds,
            token_budget: self.token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET),
            shadow_reject_prob,
            thresholds,
            seed_salt,
            action_timeout,
        })
    }
}

fn parse_thresholds(s: &str) -> anyhow::Result<BucketThresholds> {
    let values = s
        .split(',')
        .map(|item| {
            let item = item.trim();
            item.parse::<u32>()
                .with_context(|| format!("could not parse {item}"))
        })
        .collect::<anyhow::Result<Vec<u32>>>()?;
    let [high, medium, low] = values[..] else {
        bail!("expected three comma-separated thresholds, got {}", values.len());
    };
    Ok(BucketThresholds { high, medium, low })
}

/// Obtained using [`RulesBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rules {
    rounds: u32,
    token_budget: u32,
    shadow_reject_prob: f64,
    thresholds: BucketThresholds,
    seed_salt: String,
    #[serde(rename = "action_timeout_ms", serialize_with = "as_millis")]
    action_timeout: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            token_budget: DEFAULT_TOKEN_BUDGET,
            shadow_reject_prob: DEFAULT_SHADOW_REJECT_PROB,
            thresholds: BucketThresholds::default(),
            seed_salt: DEFAULT_SEED_SALT.to_string(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

impl Rules {
    /// create a RulesBuilder
    pub fn builder() -> RulesBuilder {
        RulesBuilder::new()
    }

    /// Number of rounds in a match.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Deception tokens given to each side.
    pub fn token_budget(&self) -> u32 {
        self.token_budget
    }

    /// Probability that a shadow attempt is rejected.
    pub fn shadow_reject_prob(&self) -> f64 {
        self.shadow_reject_prob
    }

    /// Token counts at which the visible bucket changes.
    pub fn thresholds(&self) -> BucketThresholds {
        self.thresholds
    }

    /// Salt mixed into every stream seed.
    pub fn seed_salt(&self) -> &str {
        &self.seed_salt
    }

    /// Time allowed for one strategy call.
    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    /// Short identifier of the parameters that decide a match's outcome: the first 10 hex
    /// characters of the SHA-256 of their canonical JSON.
    pub fn fingerprint(&self) -> String {
        // serde_json sorts object keys, which makes this canonical
        let canonical = json!({
            "rounds": self.rounds,
            "token_budget": self.token_budget,
            "shadow_reject_prob": self.shadow_reject_prob,
            "seed_salt": self.seed_salt,
        })
        .to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        digest
            .iter()
            .take(5)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
