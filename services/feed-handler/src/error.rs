//! Error types for the feed handler
//!
//! Component errors compose into `FeedError` so callers match on one type.

use feed_types::errors::TypeError;
use feed_types::ids::OrderKey;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::order_table::OrderTableError;
use crate::sequence::SequenceError;

/// Top-level feed handler error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Order error: {0}")]
    Order(#[from] OrderTableError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("No price level at {price}")]
    NoLevel { price: i64 },

    #[error("Unsupported update kind code: {0}")]
    UnsupportedUpdateKind(i64),

    #[error("Invalid quantity {quantity} for order {key}")]
    InvalidQuantity { key: OrderKey, quantity: i64 },

    #[error("Price amendment not allowed for order {0}")]
    PriceAmendNotAllowed(OrderKey),

    #[error("Snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Feed state lock poisoned")]
    StatePoisoned,
}

impl From<TypeError> for FeedError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::UnknownUpdateKind(code) => FeedError::UnsupportedUpdateKind(code),
        }
    }
}

impl FeedError {
    /// Short label for telemetry and logs.
    pub fn label(&self) -> &'static str {
        match self {
            FeedError::Sequence(SequenceError::DuplicateOrStaleSequence { .. }) => {
                "duplicate_or_stale_sequence"
            }
            FeedError::Sequence(SequenceError::PendingBufferFull { .. }) => "pending_buffer_full",
            FeedError::Sequence(SequenceError::SequenceOutOfRange { .. }) => "sequence_out_of_range",
            FeedError::Sequence(SequenceError::SequenceRegression { .. }) => "sequence_regression",
            FeedError::Order(OrderTableError::DuplicateOrderKey(_)) => "duplicate_order_key",
            FeedError::Order(OrderTableError::NotFound(_)) => "not_found",
            FeedError::Ledger(LedgerError::NonMonotonicTimestamp { .. }) => {
                "non_monotonic_timestamp"
            }
            FeedError::Ledger(LedgerError::NoEntryAtTimestamp { .. }) => "no_entry_at_timestamp",
            FeedError::Ledger(LedgerError::VolumeUnderflow { .. }) => "volume_underflow",
            FeedError::Ledger(LedgerError::VolumeOverflow { .. }) => "volume_overflow",
            FeedError::NoLevel { .. } => "no_level",
            FeedError::UnsupportedUpdateKind(_) => "unsupported_update_kind",
            FeedError::InvalidQuantity { .. } => "invalid_quantity",
            FeedError::PriceAmendNotAllowed(_) => "price_amend_not_allowed",
            FeedError::ChecksumMismatch { .. } => "checksum_mismatch",
            FeedError::StatePoisoned => "state_poisoned",
        }
    }

    /// True for the unknown-order case, whichever component raised it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::Order(OrderTableError::NotFound(_)))
    }
}
