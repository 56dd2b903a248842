//! Persistent round and match logs of a run.
//!
//! A journal owns two newline-delimited JSON sinks: one [`RoundRecord`] per line, and one
//! [`MatchSummary`] per line. Matches run concurrently, so a match's rounds are handed over
//! only once it has finished and written as one contiguous block: round logs never
//! interleave, and [`split_matches`](crate::record::split_matches) can cut them apart again.
//!
//! [`RunJournal::create`] lays a run out in a directory:
//!
//! ```text
//! <dir>/run.json       engine version, UTC start time, rules and their fingerprint
//! <dir>/rounds.jsonl   round records
//! <dir>/matches.jsonl  match summaries
//! ```

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, Context};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::trace;

use crate::{
    record::{write_line, MatchSummary, RoundRecord},
    rules::Rules,
};

/// Round log file name inside a run directory.
pub const ROUNDS_FILE: &str = "rounds.jsonl";
/// Summary log file name inside a run directory.
pub const MATCHES_FILE: &str = "matches.jsonl";
/// Run metadata file name inside a run directory.
pub const RUN_FILE: &str = "run.json";

/// Thread-safe pair of log sinks.
///
/// Buffered sinks flush themselves when dropped. Call [`close`](Self::close) to see flush
/// errors.
pub struct RunJournal<W: Write> {
    rounds: Mutex<W>,
    matches: Mutex<W>,
}

impl RunJournal<BufWriter<File>> {
    /// Create the run layout in `dir`, which is created if needed. Existing logs are
    /// truncated.
    pub fn create(dir: &Path, rules: &Rules) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create run directory {}", dir.display()))?;

        let started = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("could not format run timestamp")?;
        let metadata = json!({
            "engine_version": env!("CARGO_PKG_VERSION"),
            "timestamp_utc": started,
            "rules": rules,
            "config_fingerprint": rules.fingerprint(),
        });
        let run_path = dir.join(RUN_FILE);
        let run_file = File::create(&run_path)
            .with_context(|| format!("could not create {}", run_path.display()))?;
        serde_json::to_writer_pretty(run_file, &metadata)
            .with_context(|| format!("could not write {}", run_path.display()))?;

        let open = |name: &str| -> anyhow::Result<BufWriter<File>> {
            let path = dir.join(name);
            let file = File::create(&path)
                .with_context(|| format!("could not create {}", path.display()))?;
            Ok(BufWriter::new(file))
        };
        Ok(Self::from_writers(open(ROUNDS_FILE)?, open(MATCHES_FILE)?))
    }
}

impl<W: Write> RunJournal<W> {
    /// Journal writing rounds to `rounds` and summaries to `matches`.
    pub fn from_writers(rounds: W, matches: W) -> Self {
        Self {
            rounds: Mutex::new(rounds),
            matches: Mutex::new(matches),
        }
    }

    /// Append a finished match: its rounds as one block, then its summary.
    pub fn append_match(&self, rounds: &[RoundRecord], summary: &MatchSummary) -> anyhow::Result<()> {
        {
            let mut sink = lock(&self.rounds)?;
            for record in rounds {
                write_line(&mut *sink, record).context("could not write round record")?;
            }
        }
        let mut sink = lock(&self.matches)?;
        write_line(&mut *sink, summary).context("could not write match summary")?;
        trace!(
            bot_a = %summary.bot_a,
            bot_b = %summary.bot_b,
            rounds = rounds.len(),
            "match journaled"
        );
        Ok(())
    }

    /// Flush both sinks.
    pub fn flush(&self) -> anyhow::Result<()> {
        lock(&self.rounds)?
            .flush()
            .context("could not flush round log")?;
        lock(&self.matches)?
            .flush()
            .context("could not flush match log")
    }

    /// Flush and hand back the writers.
    pub fn close(self) -> anyhow::Result<(W, W)> {
        self.flush()?;
        let Self { rounds, matches } = self;
        Ok((into_inner(rounds)?, into_inner(matches)?))
    }
}

fn lock<W>(sink: &Mutex<W>) -> anyhow::Result<MutexGuard<'_, W>> {
    sink.lock().map_err(|_| anyhow!("journal sink poisoned"))
}

fn into_inner<W>(sink: Mutex<W>) -> anyhow::Result<W> {
    sink.into_inner().map_err(|_| anyhow!("journal sink poisoned"))
}
