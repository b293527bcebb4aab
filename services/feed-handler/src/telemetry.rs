//! Structured telemetry emitted by the feed handler
//!
//! The handler reports what happened to each update as a `FeedEvent` and
//! hands it to a `FeedObserver`. Sinks decide what to do with it; the default
//! one writes structured `tracing` records.

use std::sync::Mutex;

use feed_types::ids::OrderKey;
use feed_types::order::UpdateKind;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::sequence::GapRange;

/// Something observable that happened inside the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Update admitted and applied to the order table and ledgers.
    Applied {
        sequence: u64,
        kind: UpdateKind,
        key: OrderKey,
    },
    /// Update arrived early and is parked behind a gap.
    Buffered { sequence: u64, gap: GapRange },
    /// Update rejected, either by the gate or by dispatch.
    Rejected { sequence: u64, error: FeedError },
    /// A drain pass finished.
    Drained { applied: usize, pending: usize },
    /// Parked updates were dropped without being applied.
    Discarded { sequences: Vec<u64> },
    /// State was loaded or the expected sequence was moved from outside.
    Recovered { next_expected: u64, orders: usize },
}

impl FeedEvent {
    /// Get the event type as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            FeedEvent::Applied { .. } => "Applied",
            FeedEvent::Buffered { .. } => "Buffered",
            FeedEvent::Rejected { .. } => "Rejected",
            FeedEvent::Drained { .. } => "Drained",
            FeedEvent::Discarded { .. } => "Discarded",
            FeedEvent::Recovered { .. } => "Recovered",
        }
    }
}

/// Sink for handler telemetry.
///
/// Called while the handler's state lock is held; implementations must not
/// call back into the handler.
pub trait FeedObserver: Send + Sync {
    fn on_event(&self, event: &FeedEvent);
}

/// Observer that writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FeedObserver for TracingObserver {
    fn on_event(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Applied { sequence, kind, key } => {
                debug!(sequence, kind = kind.label(), key = %key, "Update applied");
            }
            FeedEvent::Buffered { sequence, gap } => {
                warn!(
                    sequence,
                    from = gap.from_sequence,
                    to = gap.to_sequence,
                    gap_size = gap.gap_size(),
                    "Sequence gap, update buffered"
                );
            }
            FeedEvent::Rejected { sequence, error } => {
                warn!(sequence, reason = error.label(), error = %error, "Update rejected");
            }
            FeedEvent::Drained { applied, pending } => {
                if *applied > 0 {
                    info!(applied, pending, "Pending updates drained");
                }
            }
            FeedEvent::Discarded { sequences } => {
                warn!(count = sequences.len(), ?sequences, "Pending updates discarded");
            }
            FeedEvent::Recovered { next_expected, orders } => {
                info!(next_expected, orders, "Feed state recovered");
            }
        }
    }
}

/// Observer that keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<FeedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything observed so far.
    pub fn events(&self) -> Vec<FeedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Labels of everything observed so far, in order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.events().iter().map(FeedEvent::label).collect()
    }
}

impl FeedObserver for RecordingObserver {
    fn on_event(&self, event: &FeedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
