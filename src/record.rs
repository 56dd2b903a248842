//! Persisted records and the newline-delimited JSON codec for them.
//!
//! A round log holds one [`RoundRecord`] per line, a summary log one [`MatchSummary`] per
//! line. Logs can be arbitrarily long, so reading is streaming: [`RecordReader`] yields one
//! record at a time and [`split_matches`] buffers one match at a time into a [`MatchLog`],
//! reading at most one record past it.

use std::{
    collections::BTreeMap,
    io::{BufRead, Write},
    iter::Peekable,
};

use serde::{Deserialize, Serialize};

use crate::{deception::Bucket, moves::Move, replay::ReplayError};

/// Everything observable about one round, with the buckets as they stand after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round number.
    pub round: u32,
    /// Identity of side A.
    pub bot_a: String,
    /// Identity of side B.
    pub bot_b: String,
    /// Move side A actually played.
    pub a_real: Move,
    /// Move side B actually played.
    pub b_real: Move,
    /// Move of side A shown to side B.
    pub a_visible: Move,
    /// Move of side B shown to side A.
    pub b_visible: Move,
    /// Side A showed a shadow, spending a token.
    pub a_shadow: bool,
    /// Side B showed a shadow, spending a token.
    pub b_shadow: bool,
    /// Bucket of side A's remaining tokens.
    pub a_bucket: Bucket,
    /// Bucket of side B's remaining tokens.
    pub b_bucket: Bucket,
}

/// Result of a completed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Identity of side A.
    pub bot_a: String,
    /// Identity of side B.
    pub bot_b: String,
    /// Final score of side A.
    pub score_a: i64,
    /// Final score of side B.
    pub score_b: i64,
    /// Deception tokens spent by side A.
    pub tokens_used_a: u32,
    /// Deception tokens spent by side B.
    pub tokens_used_b: u32,
    /// `tokens_used_a / max(1, budget)`.
    pub shadow_efficiency_a: f64,
    /// `tokens_used_b / max(1, budget)`.
    pub shadow_efficiency_b: f64,
    /// Real moves played by side A. Moves never played are absent.
    pub moves_a: BTreeMap<Move, u32>,
    /// Real moves played by side B. Moves never played are absent.
    pub moves_b: BTreeMap<Move, u32>,
}

/// Write `value` as one line of JSON.
pub fn write_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")
}

/// Streams [`RoundRecord`]s out of a round log, one per non-blank line.
///
/// Errors carry the 1-based line number they happened on.
pub struct RecordReader<R> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl<R: BufRead> RecordReader<R> {
    /// Reader over the lines of `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<RoundRecord, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let read = self.lines.next()?;
            self.line += 1;
            let raw = match read {
                Ok(raw) => raw,
                Err(e) => return Some(Err(ReplayError::Io(e))),
            };
            if raw.trim().is_empty() {
                continue;
            }
            let line = self.line;
            return Some(
                serde_json::from_str(&raw).map_err(|e| ReplayError::MalformedLog {
                    line,
                    reason: e.to_string(),
                }),
            );
        }
    }
}

/// The rounds of one match, as found in a round log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchLog {
    /// Identity of side A.
    pub bot_a: String,
    /// Identity of side B.
    pub bot_b: String,
    /// Records in log order.
    pub rounds: Vec<RoundRecord>,
}

/// Group a round log into matches.
///
/// A new match starts at every record of round 1, and whenever the pair of identities
/// changes. A read error ends the iteration after being yielded.
pub fn split_matches<I>(records: I) -> MatchLogs<I::IntoIter>
where
    I: IntoIterator<Item = Result<RoundRecord, ReplayError>>,
{
    MatchLogs {
        records: records.into_iter().peekable(),
        failed: false,
    }
}

/// Iterator returned by [`split_matches`].
pub struct MatchLogs<I: Iterator> {
    records: Peekable<I>,
    failed: bool,
}

impl<I> Iterator for MatchLogs<I>
where
    I: Iterator<Item = Result<RoundRecord, ReplayError>>,
{
    type Item = Result<MatchLog, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let first = match self.records.next()? {
            Ok(record) => record,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        let mut log = MatchLog {
            bot_a: first.bot_a.clone(),
            bot_b: first.bot_b.clone(),
            rounds: vec![first],
        };
        while let Some(Ok(next)) = self.records.peek() {
            if next.round == 1 || next.bot_a != log.bot_a || next.bot_b != log.bot_b {
                break;
            }
            if let Some(Ok(record)) = self.records.next() {
                log.rounds.push(record);
            }
        }
        Some(Ok(log))
    }
}
