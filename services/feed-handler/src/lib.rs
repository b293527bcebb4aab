//! Feed Handler
//!
//! Consumes a sequenced stream of order updates (New / Change / Cancel) and
//! maintains:
//! - A strictly ordered admission gate with a bounded out-of-order buffer
//! - A live order table keyed by `(client_id, order_id)`
//! - Per-price queue-ahead ledgers answering "how much volume was resting
//!   ahead of this order when it entered its level"
//! - Checksummed recovery snapshots and JSON-lines replay
//!
//! # Architecture
//!
//! ```text
//!   WireOrderUpdate (any arrival order)
//!          │
//!    ┌─────▼──────┐
//!    │SequenceGate│  ← rejects duplicates, parks early updates
//!    └─────┬──────┘
//!          │ gapless, duplicate-free
//!    ┌─────▼──────┐
//!    │  Dispatch  │  ← decode kind, validate, then mutate
//!    └──┬──────┬──┘
//!       │      │
//! ┌─────▼───┐ ┌▼────────────────┐
//! │OrderTable│ │PriceLevelLedger │ (one per price)
//! └─────────┘ └─────────────────┘
//!       │      │
//!    ┌──▼──────▼──┐
//!    │  Queries   │  order_by_key / volume_ahead_of / level_snapshot
//!    └────────────┘
//! ```
//!
//! All of the above lives behind one lock in [`FeedHandler`]; telemetry
//! leaves through the [`FeedObserver`] trait.

pub mod config;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod metrics;
pub mod order_table;
pub mod replay;
pub mod sequence;
pub mod snapshot;
pub mod telemetry;

pub use config::FeedHandlerConfig;
pub use error::FeedError;
pub use handler::{Admission, DrainReport, FeedHandler};
pub use ledger::{LevelSnapshot, PriceLevelLedger};
pub use order_table::OrderRecord;
pub use replay::{FeedReplayer, ReplayReport};
pub use sequence::{GapRange, SequenceGate};
pub use snapshot::RecoverySnapshot;
pub use telemetry::{FeedEvent, FeedObserver};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
