//! Per-price queue-ahead ledger
//!
//! Each price level keeps an append-only history of
//! `(entry timestamp → volume resting before that entry)` snapshots plus the
//! running resting total used for the next entry.
//!
//! - `record_entry` appends a snapshot, then adds the entry's quantity
//! - `remove_volume` lowers the running total only; recorded snapshots are
//!   never rewritten
//! - `volume_before` is an exact-timestamp lookup
//!
//! Levels are created on first use and kept even at zero volume so that
//! historical lookups stay answerable.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors raised by a price level ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("non-monotonic entry timestamp at price {price}: {timestamp} is not after {last}")]
    NonMonotonicTimestamp { price: i64, timestamp: i64, last: i64 },

    #[error("no entry recorded at price {price} for timestamp {timestamp}")]
    NoEntryAtTimestamp { price: i64, timestamp: i64 },

    #[error("volume underflow at price {price}: resting {resting}, requested removal {requested}")]
    VolumeUnderflow { price: i64, resting: i64, requested: i64 },

    #[error("volume overflow at price {price}: resting {resting}, requested addition {requested}")]
    VolumeOverflow { price: i64, resting: i64, requested: i64 },
}

/// One recorded queue-ahead snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Feed entry timestamp of the order that created this snapshot.
    pub entry_timestamp: i64,
    /// Resting volume at the level just before that order entered.
    pub volume_ahead: i64,
}

/// Diagnostic view of a single level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub price: i64,
    /// Running resting total that the next entry would record.
    pub resting_volume: i64,
    /// Number of recorded entries.
    pub entry_count: usize,
    /// Timestamp of the newest entry, if any.
    pub last_timestamp: Option<i64>,
    /// Cumulative volume removed by cancels and size reductions.
    pub removed_volume: i64,
}

/// Append-only ledger of resting volume for one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevelLedger {
    price: i64,
    /// Entries in strictly increasing timestamp order.
    entries: Vec<LedgerEntry>,
    resting_volume: i64,
    removed_volume: i64,
}

impl PriceLevelLedger {
    /// Create an empty ledger for `price`.
    pub fn new(price: i64) -> Self {
        Self {
            price,
            entries: Vec::new(),
            resting_volume: 0,
            removed_volume: 0,
        }
    }

    /// Check that an entry of `quantity` at `timestamp` would be accepted.
    pub fn check_entry(&self, timestamp: i64, quantity: i64) -> Result<(), LedgerError> {
        if let Some(last) = self.last_timestamp() {
            if timestamp <= last {
                return Err(LedgerError::NonMonotonicTimestamp {
                    price: self.price,
                    timestamp,
                    last,
                });
            }
        }
        self.grown_total(quantity).map(|_| ())
    }

    /// Record a new resting order and return the volume ahead of it.
    pub fn record_entry(&mut self, timestamp: i64, quantity: i64) -> Result<i64, LedgerError> {
        self.check_entry(timestamp, quantity)?;

        let volume_ahead = self.resting_volume;
        self.entries.push(LedgerEntry {
            entry_timestamp: timestamp,
            volume_ahead,
        });
        self.resting_volume = self.grown_total(quantity)?;

        debug!(
            price = self.price,
            timestamp,
            quantity,
            volume_ahead,
            entries = self.entries.len(),
            "Level entry recorded"
        );

        Ok(volume_ahead)
    }

    /// Volume that was resting when the entry at `timestamp` was recorded.
    pub fn volume_before(&self, timestamp: i64) -> Result<i64, LedgerError> {
        self.position(timestamp)
            .map(|idx| self.entries[idx].volume_ahead)
    }

    /// Check that `remove_volume(timestamp, quantity)` would succeed.
    pub fn check_removal(&self, timestamp: i64, quantity: i64) -> Result<(), LedgerError> {
        self.position(timestamp)?;
        if quantity > self.resting_volume {
            return Err(LedgerError::VolumeUnderflow {
                price: self.price,
                resting: self.resting_volume,
                requested: quantity,
            });
        }
        Ok(())
    }

    /// Take `quantity` of the order entered at `timestamp` off the level.
    ///
    /// Only entries recorded after this call see the reduced total.
    /// Returns the new running total.
    pub fn remove_volume(&mut self, timestamp: i64, quantity: i64) -> Result<i64, LedgerError> {
        self.check_removal(timestamp, quantity)?;

        self.resting_volume -= quantity;
        self.removed_volume = self.removed_volume.saturating_add(quantity);

        debug!(
            price = self.price,
            timestamp,
            quantity,
            resting = self.resting_volume,
            "Level volume removed"
        );

        Ok(self.resting_volume)
    }

    /// Grow the running total for an order that keeps its queue position.
    ///
    /// Returns the new running total.
    pub fn add_volume(&mut self, quantity: i64) -> Result<i64, LedgerError> {
        self.resting_volume = self.grown_total(quantity)?;
        Ok(self.resting_volume)
    }

    /// Verify the entry history is strictly ordered (used after restore).
    pub fn validate(&self) -> Result<(), LedgerError> {
        for pair in self.entries.windows(2) {
            if pair[1].entry_timestamp <= pair[0].entry_timestamp {
                return Err(LedgerError::NonMonotonicTimestamp {
                    price: self.price,
                    timestamp: pair[1].entry_timestamp,
                    last: pair[0].entry_timestamp,
                });
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            price: self.price,
            resting_volume: self.resting_volume,
            entry_count: self.entries.len(),
            last_timestamp: self.last_timestamp(),
            removed_volume: self.removed_volume,
        }
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn resting_volume(&self) -> i64 {
        self.resting_volume
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.entries.last().map(|e| e.entry_timestamp)
    }

    fn grown_total(&self, quantity: i64) -> Result<i64, LedgerError> {
        self.resting_volume
            .checked_add(quantity)
            .ok_or(LedgerError::VolumeOverflow {
                price: self.price,
                resting: self.resting_volume,
                requested: quantity,
            })
    }

    fn position(&self, timestamp: i64) -> Result<usize, LedgerError> {
        self.entries
            .binary_search_by_key(&timestamp, |e| e.entry_timestamp)
            .map_err(|_| LedgerError::NoEntryAtTimestamp {
                price: self.price,
                timestamp,
            })
    }
}
