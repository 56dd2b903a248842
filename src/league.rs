//! Running many matches at once.
//!
//! A [`League`] takes a list of [`Pairing`]s and plays them on a bounded pool of threads,
//! starting the next pending pairing whenever a running one finishes. Every match gets fresh
//! strategy instances from the [`StrategyRegistry`] and owns all of its state, so matches
//! never share anything but the journal, which writes each finished match as one block.
//!
//! Which pairings to play, and what to make of the results, is up to the caller.
//!
//! # Example
//!
//! ```no_run
//! use rpsls_league::prelude::*;
//!
//! let mut registry = StrategyRegistry::new();
//! registry.register("uniform", || house::by_name("uniform"))?;
//! registry.register("bluffer", || house::by_name("bluffer"))?;
//!
//! let rules = RulesBuilder::from_env().build()?;
//! let league = League::new(registry, rules.clone(), Configuration::from_env())?;
//! let journal = RunJournal::create(std::path::Path::new("results"), &rules)?;
//! let _outcomes = league.run(&[Pairing::new("uniform", "bluffer")], Some(&journal));
//! journal.close()?;
//! # anyhow::Ok(())
//! ```

use std::{fmt::Display, io::Write, sync::mpsc, thread};

use anyhow::Context;
use tracing::{error, info, instrument, trace};

use crate::{
    configuration::Configuration,
    engine::MatchEngine,
    journal::RunJournal,
    logger::init_logger,
    record::{MatchSummary, RoundRecord},
    rules::Rules,
    strategy::StrategyRegistry,
};

/// Two identities to play against each other, side A first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pairing {
    /// Identity playing side A.
    pub bot_a: String,
    /// Identity playing side B.
    pub bot_b: String,
}

impl Pairing {
    /// Pair `bot_a` (side A) against `bot_b` (side B).
    pub fn new(bot_a: impl Into<String>, bot_b: impl Into<String>) -> Self {
        Self {
            bot_a: bot_a.into(),
            bot_b: bot_b.into(),
        }
    }
}

impl Display for Pairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vs {}", self.bot_a, self.bot_b)
    }
}

/// How one pairing ended.
#[derive(Debug)]
pub struct MatchOutcome {
    /// The pairing that was played.
    pub pairing: Pairing,
    /// The summary, or why the match could not be played to the end.
    pub result: anyhow::Result<MatchSummary>,
}

/// Plays pairings concurrently.
#[derive(Debug)]
pub struct League {
    registry: StrategyRegistry,
    rules: Rules,
    config: Configuration,
}

impl League {
    /// Create a [`League`]. Installs the file logger when the configuration has a log
    /// directory.
    ///
    /// # Errors
    /// The logger could not be installed.
    #[instrument(skip_all)]
    pub fn new(
        registry: StrategyRegistry,
        rules: Rules,
        config: Configuration,
    ) -> anyhow::Result<Self> {
        if let Some(dir) = &config.log_dir {
            init_logger(dir)?;
        }
        trace!(?config, ?rules, strategies = ?registry.identities());
        Ok(Self {
            registry,
            rules,
            config,
        })
    }

    /// Rules every match is played under.
    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Strategies available to the league.
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Play every pairing, at most [`Configuration::workers`] at a time, and append each
    /// finished match to `journal`.
    ///
    /// Outcomes are returned in pairing order. A failed match never stops the others.
    pub fn run<W: Write + Send>(
        &self,
        pairings: &[Pairing],
        journal: Option<&RunJournal<W>>,
    ) -> Vec<MatchOutcome> {
        let workers = self.config.workers.max(1);
        let mut results: Vec<Option<anyhow::Result<MatchSummary>>> =
            pairings.iter().map(|_| None).collect();

        thread::scope(|scope| {
            let (tx_result, rx_result) = mpsc::channel();
            let mut pending = pairings.iter().enumerate();
            let mut running = 0;

            let mut launch = |running: &mut usize| {
                let Some((index, pairing)) = pending.next() else {
                    return;
                };
                let tx_result = tx_result.clone();
                *running += 1;
                scope.spawn(move || {
                    let result = self.play(pairing, journal);
                    // the receiver outlives every match thread
                    let _ = tx_result.send((index, result));
                });
            };

            for _ in 0..workers {
                launch(&mut running);
            }
            while running > 0 {
                // not finished <=> match running <=> result to receive
                let Ok((index, result)) = rx_result.recv() else {
                    break;
                };
                running -= 1;
                if self.config.verbose {
                    print_outcome(&pairings[index], &result);
                }
                results[index] = Some(result);
                launch(&mut running);
            }
        });

        pairings
            .iter()
            .zip(results)
            .map(|(pairing, result)| MatchOutcome {
                pairing: pairing.clone(),
                result: result.unwrap_or_else(|| Err(anyhow::anyhow!("match thread vanished"))),
            })
            .collect()
    }

    #[instrument(skip(self, pairing, journal), fields(%pairing))]
    fn play<W: Write>(
        &self,
        pairing: &Pairing,
        journal: Option<&RunJournal<W>>,
    ) -> anyhow::Result<MatchSummary> {
        let strategy_a = self.registry.instantiate(&pairing.bot_a)?;
        let strategy_b = self.registry.instantiate(&pairing.bot_b)?;
        let mut engine = MatchEngine::new(
            &self.rules,
            self.config.isolation,
            (&pairing.bot_a, strategy_a),
            (&pairing.bot_b, strategy_b),
        );

        let mut rounds: Vec<RoundRecord> = Vec::with_capacity(self.rules.rounds() as usize);
        let summary = engine
            .run(|record| rounds.push(record.clone()))
            .with_context(|| format!("{pairing} aborted"))
            .inspect_err(|e| error!("{e:#}"))?;

        if let Some(journal) = journal {
            journal
                .append_match(&rounds, &summary)
                .with_context(|| format!("could not journal {pairing}"))?;
        }
        info!(score_a = summary.score_a, score_b = summary.score_b, "done");
        Ok(summary)
    }
}

fn print_outcome(pairing: &Pairing, result: &anyhow::Result<MatchSummary>) {
    match result {
        // green match, results
        Ok(summary) => println!(
            "\x1b[32m{pairing}: \x1b[39m{}-{} (tokens {}-{})",
            summary.score_a, summary.score_b, summary.tokens_used_a, summary.tokens_used_b
        ),
        // red errors
        Err(e) => println!("\x1b[32m{pairing}: \x1b[31m{e:#}\x1b[39m"),
    }
}
