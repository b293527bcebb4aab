//! Order update schema
//!
//! One `OrderUpdate` per feed message. The sequence number orders the stream;
//! the entry timestamp is feed-assigned and orders entries within a price
//! level.

use crate::errors::TypeError;
use crate::ids::OrderKey;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

/// Kind of change an update applies to an order.
///
/// Wire codes: New = 0, Change = 1, Cancel = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateKind {
    /// Order entered the book
    New,
    /// Quantity and/or price of a live order changed
    Change,
    /// Order left the book
    Cancel,
}

impl UpdateKind {
    /// Wire code for this kind
    pub fn code(&self) -> i64 {
        match self {
            UpdateKind::New => 0,
            UpdateKind::Change => 1,
            UpdateKind::Cancel => 2,
        }
    }

    /// Label for logging
    pub fn label(&self) -> &'static str {
        match self {
            UpdateKind::New => "New",
            UpdateKind::Change => "Change",
            UpdateKind::Cancel => "Cancel",
        }
    }
}

impl TryFrom<i64> for UpdateKind {
    type Error = TypeError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(UpdateKind::New),
            1 => Ok(UpdateKind::Change),
            2 => Ok(UpdateKind::Cancel),
            other => Err(TypeError::UnknownUpdateKind(other)),
        }
    }
}

/// A decoded order update from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Feed sequence number, strictly increasing across the stream
    pub sequence: u64,
    pub kind: UpdateKind,
    pub client_id: i64,
    pub order_id: i64,
    /// Feed-assigned entry time (not wall clock)
    pub entry_timestamp: i64,
    pub instrument_id: i64,
    pub side: Side,
    pub price: i64,
    pub quantity: i64,
}

impl OrderUpdate {
    /// Compound identity of the order this update refers to.
    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.client_id, self.order_id)
    }
}

/// Wire-level update with the raw kind code still undecoded.
///
/// Conversion into [`OrderUpdate`] is where unsupported kinds are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireOrderUpdate {
    pub sequence: u64,
    pub kind: i64,
    pub client_id: i64,
    pub order_id: i64,
    pub entry_timestamp: i64,
    pub instrument_id: i64,
    pub side: Side,
    pub price: i64,
    pub quantity: i64,
}

impl TryFrom<WireOrderUpdate> for OrderUpdate {
    type Error = TypeError;

    fn try_from(wire: WireOrderUpdate) -> Result<Self, Self::Error> {
        Ok(OrderUpdate {
            sequence: wire.sequence,
            kind: UpdateKind::try_from(wire.kind)?,
            client_id: wire.client_id,
            order_id: wire.order_id,
            entry_timestamp: wire.entry_timestamp,
            instrument_id: wire.instrument_id,
            side: wire.side,
            price: wire.price,
            quantity: wire.quantity,
        })
    }
}

impl From<OrderUpdate> for WireOrderUpdate {
    fn from(update: OrderUpdate) -> Self {
        WireOrderUpdate {
            sequence: update.sequence,
            kind: update.kind.code(),
            client_id: update.client_id,
            order_id: update.order_id,
            entry_timestamp: update.entry_timestamp,
            instrument_id: update.instrument_id,
            side: update.side,
            price: update.price,
            quantity: update.quantity,
        }
    }
}
