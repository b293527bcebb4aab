//! Sequence gate for the feed handler
//!
//! Enforces strict in-order admission of updates by sequence number:
//! - An update carrying `next_expected` is released immediately
//! - Updates from the future are parked in the pending buffer
//! - Anything at or below an already consumed sequence is rejected
//!
//! Downstream dispatch therefore sees a gapless, duplicate-free stream
//! regardless of arrival order.

use std::collections::BTreeMap;

use feed_types::order::{OrderUpdate, WireOrderUpdate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default bound on the number of parked out-of-order updates.
pub const DEFAULT_MAX_PENDING: usize = 100_000;

/// Highest sequence number accepted (the feed's sequence field is int64).
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

/// Errors raised by the sequence gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("duplicate or stale sequence {sequence}: next expected is {next_expected}")]
    DuplicateOrStaleSequence { sequence: u64, next_expected: u64 },

    #[error("pending buffer full: capacity {capacity}, rejected sequence {sequence}")]
    PendingBufferFull { capacity: usize, sequence: u64 },

    #[error("sequence {sequence} out of range: maximum is {max}")]
    SequenceOutOfRange { sequence: u64, max: u64 },

    #[error("cannot move expected sequence back from {next_expected} to {requested}")]
    SequenceRegression { requested: u64, next_expected: u64 },
}

/// Check that `sequence` is a valid value for the expected-sequence counter.
///
/// The counter may sit one past `MAX_SEQUENCE` once the last sequence has
/// been admitted.
pub fn check_expected_range(sequence: u64) -> Result<(), SequenceError> {
    if sequence > MAX_SEQUENCE + 1 {
        return Err(SequenceError::SequenceOutOfRange {
            sequence,
            max: MAX_SEQUENCE + 1,
        });
    }
    Ok(())
}

/// Anything that carries a feed sequence number.
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

impl Sequenced for OrderUpdate {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Sequenced for WireOrderUpdate {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// An inclusive range of sequence numbers that have not arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRange {
    /// First missing sequence number (inclusive)
    pub from_sequence: u64,
    /// Last missing sequence number (inclusive)
    pub to_sequence: u64,
}

impl GapRange {
    /// Number of updates missing in this gap.
    pub fn gap_size(&self) -> u64 {
        self.to_sequence - self.from_sequence + 1
    }
}

/// Outcome of offering an update to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer<T> {
    /// Sequence matched; the update is admitted and must be dispatched now.
    Ready(T),
    /// Update parked until the reported gap is filled.
    Buffered(GapRange),
}

/// Gate that releases updates strictly in sequence order.
#[derive(Debug, Clone)]
pub struct SequenceGate<T = OrderUpdate> {
    /// Next sequence number allowed through.
    next_expected: u64,
    /// Out-of-order updates keyed by sequence.
    pending: BTreeMap<u64, T>,
    /// Maximum number of parked updates.
    max_pending: usize,
    /// Total updates admitted (immediately or by drain).
    admitted: u64,
    /// Total updates parked.
    buffered: u64,
    /// Total duplicate or stale offers rejected.
    duplicates: u64,
}

impl<T: Sequenced> SequenceGate<T> {
    /// Create a gate expecting `initial_sequence` first.
    pub fn new(initial_sequence: u64, max_pending: usize) -> Self {
        info!(initial_sequence, max_pending, "SequenceGate initialized");

        Self {
            next_expected: initial_sequence,
            pending: BTreeMap::new(),
            max_pending,
            admitted: 0,
            buffered: 0,
            duplicates: 0,
        }
    }

    /// Gate starting at sequence 1 with the default pending bound.
    pub fn with_defaults() -> Self {
        Self::new(1, DEFAULT_MAX_PENDING)
    }

    /// Offer an update to the gate.
    ///
    /// Returns `Ready` when the update is admitted (the caller dispatches it),
    /// `Buffered` when it arrived early.
    pub fn offer(&mut self, update: T) -> Result<Offer<T>, SequenceError> {
        let seq = update.sequence();

        if seq > MAX_SEQUENCE {
            warn!(sequence = seq, "Sequence out of range rejected");
            return Err(SequenceError::SequenceOutOfRange {
                sequence: seq,
                max: MAX_SEQUENCE,
            });
        }

        if seq == self.next_expected {
            self.next_expected += 1;
            self.admitted += 1;
            debug!(sequence = seq, "Update admitted");
            return Ok(Offer::Ready(update));
        }

        if seq < self.next_expected || self.pending.contains_key(&seq) {
            self.duplicates += 1;
            warn!(
                sequence = seq,
                next_expected = self.next_expected,
                "Duplicate or stale sequence rejected"
            );
            return Err(SequenceError::DuplicateOrStaleSequence {
                sequence: seq,
                next_expected: self.next_expected,
            });
        }

        if self.pending.len() >= self.max_pending {
            warn!(
                capacity = self.max_pending,
                sequence = seq,
                "Pending buffer full, rejecting update"
            );
            return Err(SequenceError::PendingBufferFull {
                capacity: self.max_pending,
                sequence: seq,
            });
        }

        let gap = GapRange {
            from_sequence: self.next_expected,
            to_sequence: seq - 1,
        };
        self.pending.insert(seq, update);
        self.buffered += 1;

        debug!(
            sequence = seq,
            next_expected = self.next_expected,
            gap_size = gap.gap_size(),
            pending = self.pending.len(),
            "Out-of-sequence update buffered"
        );

        Ok(Offer::Buffered(gap))
    }

    /// Release the parked update whose sequence is next, if it is present.
    ///
    /// Call repeatedly until `None` to drain everything that became
    /// contiguous; each release can unblock the following sequence.
    pub fn next_ready(&mut self) -> Option<T> {
        let update = self.pending.remove(&self.next_expected)?;
        self.next_expected += 1;
        self.admitted += 1;
        debug!(
            sequence = update.sequence(),
            pending = self.pending.len(),
            "Buffered update admitted"
        );
        Some(update)
    }

    /// Move the expected sequence forward (recovery hook).
    ///
    /// Parked updates below the new value can never be admitted and are
    /// returned to the caller as discarded. Moving backwards would re-admit
    /// consumed sequences and is rejected.
    pub fn set_next_expected(&mut self, sequence: u64) -> Result<Vec<T>, SequenceError> {
        if sequence < self.next_expected {
            return Err(SequenceError::SequenceRegression {
                requested: sequence,
                next_expected: self.next_expected,
            });
        }
        self.reset_next_expected(sequence)
    }

    /// Set the expected sequence in either direction.
    ///
    /// Only valid when the state built from earlier sequences is replaced as
    /// a whole, as on snapshot restore.
    pub fn reset_next_expected(&mut self, sequence: u64) -> Result<Vec<T>, SequenceError> {
        check_expected_range(sequence)?;

        let keep = self.pending.split_off(&sequence);
        let stale = std::mem::replace(&mut self.pending, keep);
        info!(
            previous = self.next_expected,
            next_expected = sequence,
            discarded = stale.len(),
            "Expected sequence reset"
        );
        self.next_expected = sequence;
        Ok(stale.into_values().collect())
    }

    /// Drop every parked update (external discard policy).
    pub fn discard_pending(&mut self) -> Vec<T> {
        let dropped = std::mem::take(&mut self.pending);
        if !dropped.is_empty() {
            warn!(discarded = dropped.len(), "Pending updates discarded");
        }
        dropped.into_values().collect()
    }

    /// Every sequence range still missing below the highest parked update.
    pub fn missing_ranges(&self) -> Vec<GapRange> {
        let mut gaps = Vec::new();
        let mut cursor = self.next_expected;
        for &seq in self.pending.keys() {
            if seq > cursor {
                gaps.push(GapRange {
                    from_sequence: cursor,
                    to_sequence: seq - 1,
                });
            }
            cursor = seq + 1;
        }
        gaps
    }

    /// Next sequence number allowed through.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of parked updates.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence numbers currently parked, ascending.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    /// Total updates admitted since creation.
    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    /// Total updates parked since creation.
    pub fn buffered(&self) -> u64 {
        self.buffered
    }

    /// Total duplicate or stale offers rejected since creation.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

impl<T: Sequenced> Default for SequenceGate<T> {
    fn default() -> Self {
        Self::with_defaults()
    }
}
