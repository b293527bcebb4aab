//! Replay of recorded feed traffic
//!
//! Drives a `FeedHandler` from a JSON-lines stream of `WireOrderUpdate`
//! records (one per line, blank lines ignored). Parked updates are drained
//! after every in-order admission, so replay behaves like a live consumer
//! with auto-drain regardless of the handler's configuration.
//!
//! Rejected updates are counted, not fatal: a live feed keeps going past
//! them, and so does replay. Only unreadable input or a poisoned handler
//! stops a replay early. An expected checksum can be supplied to validate
//! the rebuilt state.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::time::Instant;

use feed_types::order::WireOrderUpdate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::FeedError;
use crate::handler::{Admission, DrainReport, FeedHandler};

/// Errors that stop a replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed update on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("state checksum mismatch after replay: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Summary of a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Non-blank lines read.
    pub updates_read: u64,
    /// Updates applied, directly or by drain.
    pub updates_applied: u64,
    /// Updates parked on arrival.
    pub updates_buffered: u64,
    /// Rejection counts by error label.
    pub rejected: BTreeMap<String, u64>,
    pub next_expected: u64,
    /// Updates still parked behind a gap when the input ended.
    pub pending: usize,
    pub orders: usize,
    pub state_checksum: String,
    pub duration_ms: u128,
}

impl ReplayReport {
    /// Total rejected updates across all labels.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    fn reject(&mut self, err: &FeedError) {
        *self.rejected.entry(err.label().to_string()).or_insert(0) += 1;
    }

    fn absorb(&mut self, drained: &DrainReport) {
        self.updates_applied += drained.applied.len() as u64;
        for (_, err) in &drained.rejected {
            self.reject(err);
        }
    }
}

/// Feeds recorded updates through a handler.
pub struct FeedReplayer {
    /// Expected state checksum for validation (if known).
    expected_checksum: Option<String>,
}

impl FeedReplayer {
    pub fn new() -> Self {
        Self {
            expected_checksum: None,
        }
    }

    /// Fail the replay unless the final state checksum matches.
    pub fn with_expected_checksum(mut self, checksum: String) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    /// Replay a JSON-lines stream into `handler`.
    pub fn replay_reader<R: BufRead>(
        &self,
        handler: &FeedHandler,
        reader: R,
    ) -> Result<ReplayReport, ReplayError> {
        let start = Instant::now();
        let mut report = ReplayReport::default();

        info!("Starting feed replay");

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let update: WireOrderUpdate = serde_json::from_str(trimmed)
                .map_err(|source| ReplayError::Decode {
                    line: idx + 1,
                    source,
                })?;
            report.updates_read += 1;

            match handler.admit_wire(update) {
                Ok(Admission::Applied { drained, .. }) => {
                    report.updates_applied += 1;
                    // Without auto-drain the handler leaves the buffer alone
                    let drained = match drained {
                        Some(drained) => drained,
                        None => handler.drain_pending()?,
                    };
                    report.absorb(&drained);
                }
                Ok(Admission::Buffered { .. }) => report.updates_buffered += 1,
                Err(FeedError::StatePoisoned) => return Err(FeedError::StatePoisoned.into()),
                Err(err) => {
                    report.reject(&err);
                    // A dispatch rejection still consumed its sequence
                    if !matches!(err, FeedError::Sequence(_)) {
                        let drained = handler.drain_pending()?;
                        report.absorb(&drained);
                    }
                }
            }
        }

        let drained = handler.drain_pending()?;
        report.absorb(&drained);

        report.next_expected = handler.next_expected()?;
        report.pending = handler.pending_len()?;
        report.orders = handler.order_count()?;
        report.state_checksum = handler.state_checksum()?;
        report.duration_ms = start.elapsed().as_millis();

        if report.pending > 0 {
            warn!(
                pending = report.pending,
                next_expected = report.next_expected,
                "Replay ended with unfilled sequence gaps"
            );
        }

        if let Some(ref expected) = self.expected_checksum {
            if &report.state_checksum != expected {
                error!(
                    expected = %expected,
                    actual = %report.state_checksum,
                    "State checksum mismatch after replay"
                );
                return Err(ReplayError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: report.state_checksum,
                });
            }
        }

        info!(
            updates_read = report.updates_read,
            updates_applied = report.updates_applied,
            rejected = report.rejected_total(),
            orders = report.orders,
            duration_ms = report.duration_ms,
            "Replay completed"
        );

        Ok(report)
    }
}

impl Default for FeedReplayer {
    fn default() -> Self {
        Self::new()
    }
}
