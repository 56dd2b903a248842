//! Traits that need to be implemented by strategies, and the registry the league draws them
//! from.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    deception::{Bucket, ShadowRequest},
    moves::Move,
    remote::{AgentCommand, ProcessLimits, ProcessStrategy},
    rng::Entropy,
};

/// What a strategy is told at the start of a round.
///
/// The opponent's real move is never part of it when it was shadowed, and its token count
/// only shows through [`Bucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateView {
    /// Current round, starting at 1.
    pub round: u32,
    /// What the opponent showed last round. `None` on round 1.
    pub opponent_last_visible: Option<Move>,
    /// The move this side really played last round. `None` on round 1.
    pub own_last_real: Option<Move>,
    /// Coarse level of the opponent's deception tokens.
    pub opponent_bucket: Bucket,
}

/// What a strategy should implement.
///
/// An `Err` or a panic from either operation is treated as a fault: the engine substitutes
/// its default answer and the match goes on.
pub trait Strategy: Send {
    /// Choose the real move of this round.
    ///
    /// `entropy` is the only randomness available. Using anything else breaks replay.
    fn produce_move(&mut self, view: &StateView, entropy: &mut dyn Entropy)
        -> anyhow::Result<Move>;

    /// Optionally ask to show another move to the opponent. Called after
    /// [`produce_move`](Strategy::produce_move) in the same round.
    fn request_shadow(&mut self, _view: &StateView) -> anyhow::Result<ShadowRequest> {
        Ok(ShadowRequest::none())
    }
}

type Factory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Strategy>> + Send + Sync>;

/// Strategies available to the league, keyed by identity.
///
/// Every match and every replay gets a fresh instance, so a strategy's private state starts
/// over each time.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, Factory>,
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `identity`.
    ///
    /// # Errors
    /// The identity is empty, contains `|`, whitespace or control characters, is already
    /// taken, or the factory fails to build a first instance.
    #[instrument(skip(self, factory))]
    pub fn register<F>(&mut self, identity: &str, factory: F) -> anyhow::Result<()>
    where
        F: Fn() -> anyhow::Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        check_identity(identity)?;
        if self.factories.contains_key(identity) {
            bail!("strategy '{identity}' is already registered");
        }
        drop(factory().with_context(|| format!("strategy '{identity}' failed to initialize"))?);
        self.factories
            .insert(identity.to_string(), Arc::new(factory));
        info!("registered strategy '{identity}'");
        Ok(())
    }

    /// Register an executable agent, launched in its own process for every instance.
    pub fn register_process(
        &mut self,
        identity: &str,
        command: AgentCommand,
        limits: ProcessLimits,
    ) -> anyhow::Result<()> {
        let name = identity.to_string();
        self.register(identity, move || {
            let strategy = ProcessStrategy::launch(&name, &command, &limits)?;
            Ok(Box::new(strategy) as Box<dyn Strategy>)
        })
    }

    /// A fresh instance of `identity`.
    pub fn instantiate(&self, identity: &str) -> anyhow::Result<Box<dyn Strategy>> {
        let factory = self
            .factories
            .get(identity)
            .with_context(|| format!("unknown strategy '{identity}'"))?;
        factory().with_context(|| format!("strategy '{identity}' failed to initialize"))
    }

    /// Whether `identity` is registered.
    pub fn contains(&self, identity: &str) -> bool {
        self.factories.contains_key(identity)
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("identities", &self.identities())
            .finish()
    }
}

/// Identities feed the seed derivation as `"{a}|{b}|{salt}"`, so `|` would make two
/// different pairings hash the same input.
fn check_identity(identity: &str) -> anyhow::Result<()> {
    if identity.is_empty() {
        bail!("strategy identity cannot be empty");
    }
    if let Some(c) = identity
        .chars()
        .find(|c| *c == '|' || c.is_whitespace() || c.is_control())
    {
        bail!("strategy identity '{identity}' contains forbidden character {c:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngStream;

    struct Fixed(Move);

    impl Strategy for Fixed {
        fn produce_move(&mut self, _: &StateView, _: &mut dyn Entropy) -> anyhow::Result<Move> {
            Ok(self.0)
        }
    }

    fn fixed(m: Move) -> impl Fn() -> anyhow::Result<Box<dyn Strategy>> + Send + Sync {
        move || Ok(Box::new(Fixed(m)) as Box<dyn Strategy>)
    }

    fn first_view() -> StateView {
        StateView {
            round: 1,
            opponent_last_visible: None,
            own_last_real: None,
            opponent_bucket: Bucket::High,
        }
    }

    #[test]
    fn registered_strategies_can_be_instantiated() {
        let mut registry = StrategyRegistry::new();
        registry.register("rocky", fixed(Move::Rock)).unwrap();
        registry.register("spocky", fixed(Move::Spock)).unwrap();
        assert_eq!(registry.identities(), vec!["rocky", "spocky"]);

        let mut s = registry.instantiate("spocky").unwrap();
        let mut rng = RngStream::from_seed(1);
        assert_eq!(s.produce_move(&first_view(), &mut rng).unwrap(), Move::Spock);
        assert_eq!(s.request_shadow(&first_view()).unwrap(), ShadowRequest::none());
        assert!(registry.instantiate("nobody").is_err());
    }

    #[test]
    fn bad_identities_are_refused() {
        let mut registry = StrategyRegistry::new();
        for bad in ["", "a|b", "two words", "tab\t", "nl\n"] {
            assert!(registry.register(bad, fixed(Move::Rock)).is_err(), "{bad:?}");
        }
        registry.register("ok", fixed(Move::Rock)).unwrap();
        assert!(registry.register("ok", fixed(Move::Paper)).is_err());
    }

    #[test]
    fn failing_factory_is_refused_at_registration() {
        let mut registry = StrategyRegistry::new();
        let err = registry
            .register("broken", || -> anyhow::Result<Box<dyn Strategy>> {
                bail!("no luck")
            })
            .unwrap_err();
        assert!(format!("{err:#}").contains("no luck"));
        assert!(!registry.contains("broken"));
    }
}
