//! Recovery snapshots of the feed handler state
//!
//! A snapshot captures the expected sequence, every live order and every
//! price level ledger at a consistency point, tagged with a SHA-256 checksum
//! over a deterministic encoding of that content. Parked out-of-order updates
//! are not part of a snapshot.
//!
//! The handler can be rebuilt from a snapshot before live processing starts
//! (see `FeedHandler::restore`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FeedError;
use crate::ledger::PriceLevelLedger;
use crate::order_table::{OrderRecord, OrderTable};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full, checksummed copy of the handler's order and level state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub version: u32,
    /// First sequence number to process after restoring.
    pub next_expected: u64,
    /// Live orders in key order.
    pub orders: Vec<OrderRecord>,
    /// Level ledgers in ascending price order.
    pub levels: Vec<PriceLevelLedger>,
    /// SHA-256 of the content above.
    pub checksum: String,
}

impl RecoverySnapshot {
    /// Capture a snapshot from live state.
    pub fn capture(
        next_expected: u64,
        orders: &OrderTable,
        levels: &BTreeMap<i64, PriceLevelLedger>,
    ) -> Self {
        let orders: Vec<OrderRecord> = orders.iter().copied().collect();
        let levels: Vec<PriceLevelLedger> = levels.values().cloned().collect();
        let checksum = compute_checksum(next_expected, &orders, &levels);

        Self {
            version: SNAPSHOT_VERSION,
            next_expected,
            orders,
            levels,
            checksum,
        }
    }

    /// Recompute the checksum and compare it with the stored one.
    pub fn verify(&self) -> Result<(), FeedError> {
        let actual = compute_checksum(self.next_expected, &self.orders, &self.levels);
        if actual != self.checksum {
            return Err(FeedError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Checksum over the expected sequence, orders and levels.
///
/// Callers pass orders and levels in key/price order so that identical state
/// always hashes identically.
pub fn compute_checksum(
    next_expected: u64,
    orders: &[OrderRecord],
    levels: &[PriceLevelLedger],
) -> String {
    let mut hasher = Sha256::new();

    hasher.update(next_expected.to_le_bytes());
    hasher.update(b"|");

    for order in orders {
        hasher.update(order.key.client_id.to_le_bytes());
        hasher.update(order.key.order_id.to_le_bytes());
        hasher.update(order.instrument_id.to_le_bytes());
        hasher.update([order.side as u8]);
        hasher.update(order.price.to_le_bytes());
        hasher.update(order.quantity.to_le_bytes());
        hasher.update(order.entry_timestamp.to_le_bytes());
        hasher.update(b",");
    }
    hasher.update(b"---");

    for level in levels {
        let snap = level.snapshot();
        hasher.update(snap.price.to_le_bytes());
        hasher.update(b":");
        hasher.update(snap.resting_volume.to_le_bytes());
        hasher.update(snap.removed_volume.to_le_bytes());
        for entry in level.entries() {
            hasher.update(entry.entry_timestamp.to_le_bytes());
            hasher.update(entry.volume_ahead.to_le_bytes());
        }
        hasher.update(b",");
    }
    hasher.update(b"===");

    format!("{:x}", hasher.finalize())
}
