//! Live order table keyed by `(client id, order id)`
//!
//! Records relate to their price level only through the `price` field; the
//! level ledger is looked up by price on every use.

use std::collections::BTreeMap;

use feed_types::ids::OrderKey;
use feed_types::order::{OrderUpdate, Side};
use serde::{Deserialize, Serialize};

/// Errors raised by the order table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderTableError {
    #[error("order {0} is already live")]
    DuplicateOrderKey(OrderKey),

    #[error("order {0} not found")]
    NotFound(OrderKey),
}

/// Current state of a live order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub key: OrderKey,
    pub instrument_id: i64,
    pub side: Side,
    pub price: i64,
    pub quantity: i64,
    /// Entry timestamp under which the order's level snapshot is recorded.
    pub entry_timestamp: i64,
    /// Sequence of the last update applied to this order.
    pub last_sequence: u64,
}

impl From<&OrderUpdate> for OrderRecord {
    fn from(update: &OrderUpdate) -> Self {
        Self {
            key: update.key(),
            instrument_id: update.instrument_id,
            side: update.side,
            price: update.price,
            quantity: update.quantity,
            entry_timestamp: update.entry_timestamp,
            last_sequence: update.sequence,
        }
    }
}

/// Map from order identity to live record.
#[derive(Debug, Clone, Default)]
pub struct OrderTable {
    orders: BTreeMap<OrderKey, OrderRecord>,
}

impl OrderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new live order.
    pub fn insert(&mut self, key: OrderKey, record: OrderRecord) -> Result<(), OrderTableError> {
        if self.orders.contains_key(&key) {
            return Err(OrderTableError::DuplicateOrderKey(key));
        }
        self.orders.insert(key, record);
        Ok(())
    }

    pub fn find(&self, key: &OrderKey) -> Result<&OrderRecord, OrderTableError> {
        self.orders.get(key).ok_or(OrderTableError::NotFound(*key))
    }

    pub fn contains(&self, key: &OrderKey) -> bool {
        self.orders.contains_key(key)
    }

    /// Mutate a live record in place.
    pub fn update<F>(&mut self, key: &OrderKey, mutate: F) -> Result<&OrderRecord, OrderTableError>
    where
        F: FnOnce(&mut OrderRecord),
    {
        let record = self
            .orders
            .get_mut(key)
            .ok_or(OrderTableError::NotFound(*key))?;
        mutate(record);
        Ok(record)
    }

    /// Remove a live order, returning its final record.
    pub fn remove(&mut self, key: &OrderKey) -> Result<OrderRecord, OrderTableError> {
        self.orders
            .remove(key)
            .ok_or(OrderTableError::NotFound(*key))
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Live records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values()
    }
}
