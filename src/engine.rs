//! The round-by-round state machine of one match.
//!
//! A [`MatchEngine`] owns everything about a match: both contestants with their streams,
//! token pools, scores and histories. Nothing is shared with other matches, so any number
//! of engines can run side by side.
//!
//! Each round goes through the same steps:
//!
//! 1. both [`StateView`]s are built from the state left by the previous round
//! 2. side A then side B choose their real move through the [`ExecutionGuard`]
//! 3. side A then side B may request a shadow
//! 4. each funded and complete request costs one draw from the requesting side's stream, and
//!    is accepted when that draw is above the rejection probability; an accepted shadow
//!    spends one token and replaces the move the opponent will see
//! 5. the round is scored on the real moves only
//! 6. a [`RoundRecord`] is emitted with the buckets as they stand after the round
//!
//! There is no early termination: a match always plays every round of its [`Rules`].

use std::collections::BTreeMap;

use tracing::{error, info, instrument, trace};

use crate::{
    deception::{ShadowRequest, TokenPool},
    error::MatchError,
    guard::{Contestant, ExecutionGuard, GuardStats, Isolation},
    moves::{resolve, Move},
    record::{MatchSummary, RoundRecord},
    rng::derive_streams,
    rules::Rules,
    strategy::{StateView, Strategy},
};

/// Where a match stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// No round played yet.
    NotStarted,
    /// The given round was the last one played.
    RoundInProgress(u32),
    /// Every round was played.
    Completed,
    /// A fatal error ended the match.
    Aborted,
}

/// One side's state within a match.
pub(crate) struct Side {
    pub(crate) contestant: Contestant,
    pub(crate) pool: TokenPool,
    pub(crate) score: i64,
    pub(crate) last_real: Option<Move>,
    pub(crate) last_visible: Option<Move>,
    pub(crate) moves: BTreeMap<Move, u32>,
}

impl Side {
    pub(crate) fn new(contestant: Contestant, budget: u32) -> Self {
        Self {
            contestant,
            pool: TokenPool::new(budget),
            score: 0,
            last_real: None,
            last_visible: None,
            moves: BTreeMap::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.contestant.name()
    }

    /// Real move of this round, with malformed moves turned into a match error.
    pub(crate) fn real_move(
        &mut self,
        guard: &ExecutionGuard,
        view: &StateView,
    ) -> Result<Move, MatchError> {
        guard
            .produce_move(&mut self.contestant, view)
            .map_err(|invalid| MatchError::MalformedMove {
                round: view.round,
                bot: self.name().to_string(),
                token: invalid.token,
            })
    }
}

/// Decide a shadow request: a funded, complete request costs one draw from the requesting
/// side's stream and is accepted when the draw is above `reject_prob`.
///
/// Returns the draw outcome, `None` when no draw was taken.
pub(crate) fn roll_shadow(
    contestant: &mut Contestant,
    request: &ShadowRequest,
    pool: &TokenPool,
    reject_prob: f64,
) -> Option<(Move, bool)> {
    let shadow = request.attempt(pool)?;
    // a contestant whose strategy is away never gets this far: its request is always `none`
    let draw = contestant.draw_unit()?;
    Some((shadow, draw > reject_prob))
}

/// Runs a single match between two strategies.
pub struct MatchEngine {
    rules: Rules,
    guard: ExecutionGuard,
    sides: [Side; 2],
    phase: MatchPhase,
    failure: Option<MatchError>,
}

impl MatchEngine {
    /// Set up a match between `a` and `b`, each given as `(identity, strategy)`.
    ///
    /// Streams are derived from the two identities, in that order, and the rules' salt.
    pub fn new(
        rules: &Rules,
        isolation: Isolation,
        a: (&str, Box<dyn Strategy>),
        b: (&str, Box<dyn Strategy>),
    ) -> Self {
        let (stream_a, stream_b) = derive_streams(a.0, b.0, rules.seed_salt());
        let budget = rules.token_budget();
        Self {
            rules: rules.clone(),
            guard: ExecutionGuard::new(rules.action_timeout(), isolation),
            sides: [
                Side::new(Contestant::new(a.0, a.1, stream_a), budget),
                Side::new(Contestant::new(b.0, b.1, stream_b), budget),
            ],
            phase: MatchPhase::NotStarted,
            failure: None,
        }
    }

    /// Where the match stands.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Identities of side A and side B.
    pub fn names(&self) -> (&str, &str) {
        (self.sides[0].name(), self.sides[1].name())
    }

    /// Current scores of side A and side B.
    pub fn scores(&self) -> (i64, i64) {
        (self.sides[0].score, self.sides[1].score)
    }

    /// Tokens left to side A and side B.
    pub fn tokens_left(&self) -> (u32, u32) {
        (self.sides[0].pool.remaining(), self.sides[1].pool.remaining())
    }

    /// Values drawn so far from each side's stream. `None` for a side whose strategy is still
    /// busy with a call that ran out of budget.
    pub fn stream_draws(&self) -> (Option<u64>, Option<u64>) {
        (
            self.sides[0].contestant.draws(),
            self.sides[1].contestant.draws(),
        )
    }

    /// How each side's calls went so far.
    pub fn guard_stats(&self) -> (GuardStats, GuardStats) {
        (
            self.sides[0].contestant.stats(),
            self.sides[1].contestant.stats(),
        )
    }

    fn next_round(&self) -> Option<u32> {
        match self.phase {
            MatchPhase::NotStarted => Some(1),
            MatchPhase::RoundInProgress(r) if r < self.rules.rounds() => Some(r + 1),
            _ => None,
        }
    }

    fn view_for(&self, side: usize, round: u32) -> StateView {
        let own = &self.sides[side];
        let opponent = &self.sides[1 - side];
        StateView {
            round,
            opponent_last_visible: opponent.last_visible,
            own_last_real: own.last_real,
            opponent_bucket: self.rules.thresholds().classify(opponent.pool.remaining()),
        }
    }

    /// Play the next round.
    ///
    /// Returns `Ok(None)` once every round has been played.
    ///
    /// # Errors
    /// A strategy produced a malformed move or a pair could not be resolved. The match is
    /// aborted and every later call returns the same error.
    pub fn play_round(&mut self) -> Result<Option<RoundRecord>, MatchError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let Some(round) = self.next_round() else {
            return Ok(None);
        };
        match self.step(round) {
            Ok(record) => {
                self.phase = if round == self.rules.rounds() {
                    MatchPhase::Completed
                } else {
                    MatchPhase::RoundInProgress(round)
                };
                Ok(Some(record))
            }
            Err(e) => {
                let (a, b) = self.names();
                error!(bot_a = a, bot_b = b, "match aborted: {e}");
                self.phase = MatchPhase::Aborted;
                self.failure = Some(e.clone());
                Err(e)
            }
        }
    }

    fn step(&mut self, round: u32) -> Result<RoundRecord, MatchError> {
        let views = [self.view_for(0, round), self.view_for(1, round)];

        let mut real = [Move::DEFAULT; 2];
        for (i, side) in self.sides.iter_mut().enumerate() {
            real[i] = side.real_move(&self.guard, &views[i])?;
        }

        let mut requests = [ShadowRequest::none(); 2];
        for (i, side) in self.sides.iter_mut().enumerate() {
            requests[i] = self.guard.request_shadow(&mut side.contestant, &views[i]);
        }

        let mut visible = real;
        let mut shadowed = [false; 2];
        for (i, side) in self.sides.iter_mut().enumerate() {
            let rolled = roll_shadow(
                &mut side.contestant,
                &requests[i],
                &side.pool,
                self.rules.shadow_reject_prob(),
            );
            if let Some((shadow, true)) = rolled {
                side.pool.spend();
                visible[i] = shadow;
                shadowed[i] = true;
            }
        }

        let (delta_a, delta_b) = resolve(real[0], real[1])?;
        for (i, (side, delta)) in self.sides.iter_mut().zip([delta_a, delta_b]).enumerate() {
            side.score += i64::from(delta);
            *side.moves.entry(real[i]).or_default() += 1;
            side.last_real = Some(real[i]);
            side.last_visible = Some(visible[i]);
        }

        let thresholds = self.rules.thresholds();
        let [a, b] = &self.sides;
        let record = RoundRecord {
            round,
            bot_a: a.name().to_string(),
            bot_b: b.name().to_string(),
            a_real: real[0],
            b_real: real[1],
            a_visible: visible[0],
            b_visible: visible[1],
            a_shadow: shadowed[0],
            b_shadow: shadowed[1],
            a_bucket: thresholds.classify(a.pool.remaining()),
            b_bucket: thresholds.classify(b.pool.remaining()),
        };
        trace!(?record);
        Ok(record)
    }

    /// The summary of a completed match. `None` until every round has been played.
    pub fn summary(&self) -> Option<MatchSummary> {
        (self.phase == MatchPhase::Completed).then(|| self.tally())
    }

    fn tally(&self) -> MatchSummary {
        let [a, b] = &self.sides;
        MatchSummary {
            bot_a: a.name().to_string(),
            bot_b: b.name().to_string(),
            score_a: a.score,
            score_b: b.score,
            tokens_used_a: a.pool.used(),
            tokens_used_b: b.pool.used(),
            shadow_efficiency_a: a.pool.efficiency(),
            shadow_efficiency_b: b.pool.efficiency(),
            moves_a: a.moves.clone(),
            moves_b: b.moves.clone(),
        }
    }

    /// Play every remaining round, handing each record to `on_round`, and return the
    /// summary.
    ///
    /// # Errors
    /// See [`play_round`](Self::play_round).
    #[instrument(skip_all, fields(bot_a = self.sides[0].name(), bot_b = self.sides[1].name()))]
    pub fn run<F>(&mut self, mut on_round: F) -> Result<MatchSummary, MatchError>
    where
        F: FnMut(&RoundRecord),
    {
        while let Some(record) = self.play_round()? {
            on_round(&record);
        }
        let summary = self.tally();
        let (stats_a, stats_b) = self.guard_stats();
        info!(
            score_a = summary.score_a,
            score_b = summary.score_b,
            tokens_used_a = summary.tokens_used_a,
            tokens_used_b = summary.tokens_used_b,
            ?stats_a,
            ?stats_b,
            "match completed"
        );
        Ok(summary)
    }
}
