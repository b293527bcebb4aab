//! Identifier types for orders on the feed
//!
//! Neither the client id nor the order id is unique on its own; only the pair
//! identifies a live order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compound identity of a live order: `(client id, order id)`.
///
/// Ordering is lexicographic (client first), which keeps iteration over
/// order tables deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub client_id: i64,
    pub order_id: i64,
}

impl OrderKey {
    pub const fn new(client_id: i64, order_id: i64) -> Self {
        Self {
            client_id,
            order_id,
        }
    }
}

impl From<(i64, i64)> for OrderKey {
    fn from((client_id, order_id): (i64, i64)) -> Self {
        Self::new(client_id, order_id)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.client_id, self.order_id)
    }
}
