//! Feed handler: sequencing, dispatch and queries over one consistency domain
//!
//! `FeedState` holds the sequence gate, the order table and the price →
//! ledger map and implements dispatch without any locking. `FeedHandler`
//! wraps it in a single `RwLock` so that mutations are serialized and a query
//! never observes an order without its ledger entry (or the reverse).
//!
//! Dispatch validates every precondition before touching state, so a
//! rejected update leaves orders and ledgers exactly as they were. Its
//! sequence number is still consumed.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use feed_types::ids::OrderKey;
use feed_types::order::{OrderUpdate, UpdateKind, WireOrderUpdate};
use tracing::info;

use crate::config::FeedHandlerConfig;
use crate::error::FeedError;
use crate::ledger::{LevelSnapshot, PriceLevelLedger};
use crate::metrics::{Alert, FeedMetrics};
use crate::order_table::{OrderRecord, OrderTable, OrderTableError};
use crate::sequence::{check_expected_range, GapRange, Offer, Sequenced, SequenceGate};
use crate::snapshot::{compute_checksum, RecoverySnapshot};
use crate::telemetry::{FeedEvent, FeedObserver, TracingObserver};

/// Result of admitting one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Update was next in sequence and has been applied.
    Applied {
        sequence: u64,
        /// Outcome of the follow-up drain when `auto_drain` is enabled.
        drained: Option<DrainReport>,
    },
    /// Update arrived early and waits behind `gap`.
    Buffered { gap: GapRange },
}

/// Outcome of a drain pass over the pending buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Sequences admitted and applied, in order.
    pub applied: Vec<u64>,
    /// Sequences admitted but rejected by dispatch.
    pub rejected: Vec<(u64, FeedError)>,
}

impl DrainReport {
    /// Number of sequences consumed by the drain.
    pub fn admitted(&self) -> usize {
        self.applied.len() + self.rejected.len()
    }
}

/// Sequencing, order and level state forming one consistency domain.
#[derive(Debug, Clone)]
pub struct FeedState {
    gate: SequenceGate<WireOrderUpdate>,
    orders: OrderTable,
    levels: BTreeMap<i64, PriceLevelLedger>,
    allow_price_amend: bool,
}

impl FeedState {
    pub fn new(config: &FeedHandlerConfig) -> Self {
        Self {
            gate: SequenceGate::new(config.initial_sequence, config.max_pending),
            orders: OrderTable::new(),
            levels: BTreeMap::new(),
            allow_price_amend: config.allow_price_amend,
        }
    }

    /// Apply an admitted update to the order table and ledgers.
    pub fn apply(&mut self, update: &OrderUpdate) -> Result<(), FeedError> {
        match update.kind {
            UpdateKind::New => self.apply_new(update),
            UpdateKind::Change => self.apply_change(update),
            UpdateKind::Cancel => self.apply_cancel(update),
        }
    }

    fn apply_new(&mut self, update: &OrderUpdate) -> Result<(), FeedError> {
        let key = update.key();
        if update.quantity <= 0 {
            return Err(FeedError::InvalidQuantity {
                key,
                quantity: update.quantity,
            });
        }
        if self.orders.contains(&key) {
            return Err(OrderTableError::DuplicateOrderKey(key).into());
        }
        if let Some(level) = self.levels.get(&update.price) {
            level.check_entry(update.entry_timestamp, update.quantity)?;
        }

        self.orders.insert(key, OrderRecord::from(update))?;
        self.level_mut(update.price)
            .record_entry(update.entry_timestamp, update.quantity)?;
        Ok(())
    }

    fn apply_change(&mut self, update: &OrderUpdate) -> Result<(), FeedError> {
        let key = update.key();
        let current = *self.orders.find(&key)?;
        if update.quantity <= 0 {
            return Err(FeedError::InvalidQuantity {
                key,
                quantity: update.quantity,
            });
        }

        let repriced = update.price != current.price;
        if repriced && !self.allow_price_amend {
            return Err(FeedError::PriceAmendNotAllowed(key));
        }
        let requeued = repriced || update.entry_timestamp != current.entry_timestamp;

        let old_level = self
            .levels
            .get(&current.price)
            .ok_or(FeedError::NoLevel {
                price: current.price,
            })?;

        if requeued {
            // Leave the old queue position, enter again at the back
            old_level.check_removal(current.entry_timestamp, current.quantity)?;
            if let Some(new_level) = self.levels.get(&update.price) {
                new_level.check_entry(update.entry_timestamp, update.quantity)?;
            }

            self.level_mut(current.price)
                .remove_volume(current.entry_timestamp, current.quantity)?;
            self.level_mut(update.price)
                .record_entry(update.entry_timestamp, update.quantity)?;
        } else {
            let delta = update.quantity - current.quantity;
            if delta < 0 {
                old_level.check_removal(current.entry_timestamp, -delta)?;
                self.level_mut(current.price)
                    .remove_volume(current.entry_timestamp, -delta)?;
            } else if delta > 0 {
                self.level_mut(current.price).add_volume(delta)?;
            }
        }

        self.orders.update(&key, |record| {
            record.price = update.price;
            record.quantity = update.quantity;
            record.entry_timestamp = update.entry_timestamp;
            record.last_sequence = update.sequence;
        })?;
        Ok(())
    }

    fn apply_cancel(&mut self, update: &OrderUpdate) -> Result<(), FeedError> {
        let key = update.key();
        let current = *self.orders.find(&key)?;
        let level = self
            .levels
            .get_mut(&current.price)
            .ok_or(FeedError::NoLevel {
                price: current.price,
            })?;
        level.check_removal(current.entry_timestamp, current.quantity)?;

        level.remove_volume(current.entry_timestamp, current.quantity)?;
        self.orders.remove(&key)?;
        Ok(())
    }

    /// Ledger for `price`, created on first use.
    fn level_mut(&mut self, price: i64) -> &mut PriceLevelLedger {
        self.levels
            .entry(price)
            .or_insert_with(|| PriceLevelLedger::new(price))
    }

    pub fn order(&self, key: &OrderKey) -> Result<OrderRecord, FeedError> {
        Ok(*self.orders.find(key)?)
    }

    /// Volume that was resting at the order's price when it entered.
    pub fn volume_ahead_of(&self, key: &OrderKey) -> Result<i64, FeedError> {
        let order = self.orders.find(key)?;
        let level = self.levels.get(&order.price).ok_or(FeedError::NoLevel {
            price: order.price,
        })?;
        Ok(level.volume_before(order.entry_timestamp)?)
    }

    pub fn level_snapshot(&self, price: i64) -> Result<LevelSnapshot, FeedError> {
        self.levels
            .get(&price)
            .map(PriceLevelLedger::snapshot)
            .ok_or(FeedError::NoLevel { price })
    }

    pub fn next_expected(&self) -> u64 {
        self.gate.next_expected()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn capture(&self) -> RecoverySnapshot {
        RecoverySnapshot::capture(self.gate.next_expected(), &self.orders, &self.levels)
    }

    /// Checksum over the same content a snapshot would carry.
    pub fn checksum(&self) -> String {
        let orders: Vec<OrderRecord> = self.orders.iter().copied().collect();
        let levels: Vec<PriceLevelLedger> = self.levels.values().cloned().collect();
        compute_checksum(self.gate.next_expected(), &orders, &levels)
    }

    /// Replace orders and levels with the snapshot's content.
    ///
    /// The snapshot is fully validated first; on error nothing changes.
    /// Returns parked updates made stale by the new expected sequence.
    fn restore(&mut self, snapshot: &RecoverySnapshot) -> Result<Vec<WireOrderUpdate>, FeedError> {
        snapshot.verify()?;
        check_expected_range(snapshot.next_expected)?;

        let mut levels = BTreeMap::new();
        for level in &snapshot.levels {
            level.validate()?;
            levels.insert(level.price(), level.clone());
        }

        let mut orders = OrderTable::new();
        for record in &snapshot.orders {
            let level = levels.get(&record.price).ok_or(FeedError::NoLevel {
                price: record.price,
            })?;
            level.volume_before(record.entry_timestamp)?;
            orders.insert(record.key, *record)?;
        }

        self.orders = orders;
        self.levels = levels;
        // The whole state is replaced, so the counter may move backwards
        Ok(self.gate.reset_next_expected(snapshot.next_expected)?)
    }
}

/// Thread-safe feed handler.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct FeedHandler {
    state: RwLock<FeedState>,
    config: FeedHandlerConfig,
    metrics: Arc<FeedMetrics>,
    observer: Arc<dyn FeedObserver>,
}

impl FeedHandler {
    /// Create a handler that reports telemetry through `tracing`.
    pub fn new(config: FeedHandlerConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    /// Create a handler reporting telemetry to `observer`.
    pub fn with_observer(config: FeedHandlerConfig, observer: Arc<dyn FeedObserver>) -> Self {
        info!(
            initial_sequence = config.initial_sequence,
            max_pending = config.max_pending,
            auto_drain = config.auto_drain,
            allow_price_amend = config.allow_price_amend,
            "FeedHandler initialized"
        );

        Self {
            state: RwLock::new(FeedState::new(&config)),
            config,
            metrics: Arc::new(FeedMetrics::new()),
            observer,
        }
    }

    /// Handler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(FeedHandlerConfig::default())
    }

    /// Admit a decoded update.
    pub fn admit(&self, update: OrderUpdate) -> Result<Admission, FeedError> {
        self.admit_wire(WireOrderUpdate::from(update))
    }

    /// Admit a wire-level update.
    ///
    /// An unknown kind code consumes its sequence number like any other
    /// update and is rejected at dispatch with `UnsupportedUpdateKind`.
    /// With `auto_drain`, a rejected update still triggers the drain; its
    /// results are then visible through telemetry only.
    pub fn admit_wire(&self, update: WireOrderUpdate) -> Result<Admission, FeedError> {
        let sequence = update.sequence();
        let mut state = self.write()?;

        match state.gate.offer(update) {
            Err(err) => {
                let err = FeedError::from(err);
                self.emit(&FeedEvent::Rejected {
                    sequence,
                    error: err.clone(),
                });
                Err(err)
            }
            Ok(Offer::Buffered(gap)) => {
                self.emit(&FeedEvent::Buffered { sequence, gap });
                self.metrics.set_pending_depth(state.gate.pending_len());
                Ok(Admission::Buffered { gap })
            }
            Ok(Offer::Ready(update)) => {
                let result = self.dispatch(&mut state, update);
                let drained = if self.config.auto_drain {
                    Some(self.drain_locked(&mut state))
                } else {
                    None
                };
                result.map(|()| Admission::Applied { sequence, drained })
            }
        }
    }

    /// Admit every parked update that has become contiguous.
    ///
    /// Dispatch rejections are collected in the report; they do not stop the
    /// drain.
    pub fn drain_pending(&self) -> Result<DrainReport, FeedError> {
        let mut state = self.write()?;
        Ok(self.drain_locked(&mut state))
    }

    fn drain_locked(&self, state: &mut FeedState) -> DrainReport {
        let mut report = DrainReport::default();
        while let Some(update) = state.gate.next_ready() {
            let sequence = update.sequence();
            match self.dispatch(state, update) {
                Ok(()) => report.applied.push(sequence),
                Err(err) => report.rejected.push((sequence, err)),
            }
        }
        self.emit(&FeedEvent::Drained {
            applied: report.applied.len(),
            pending: state.gate.pending_len(),
        });
        report
    }

    fn dispatch(&self, state: &mut FeedState, wire: WireOrderUpdate) -> Result<(), FeedError> {
        let started = Instant::now();
        let result = OrderUpdate::try_from(wire)
            .map_err(FeedError::from)
            .and_then(|update| state.apply(&update).map(|()| update));
        self.metrics
            .record_dispatch_latency(started.elapsed().as_nanos() as u64);

        match result {
            Ok(update) => {
                self.emit(&FeedEvent::Applied {
                    sequence: update.sequence,
                    kind: update.kind,
                    key: update.key(),
                });
                Ok(())
            }
            Err(err) => {
                self.emit(&FeedEvent::Rejected {
                    sequence: wire.sequence,
                    error: err.clone(),
                });
                Err(err)
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Current record of the order `(client_id, order_id)`.
    pub fn order_by_key(&self, client_id: i64, order_id: i64) -> Result<OrderRecord, FeedError> {
        self.read()?.order(&OrderKey::new(client_id, order_id))
    }

    /// Resting volume ahead of the order at the moment it entered its level.
    pub fn volume_ahead_of(&self, client_id: i64, order_id: i64) -> Result<i64, FeedError> {
        self.read()?
            .volume_ahead_of(&OrderKey::new(client_id, order_id))
    }

    /// Diagnostic view of the ledger at `price`.
    pub fn level_snapshot(&self, price: i64) -> Result<LevelSnapshot, FeedError> {
        self.read()?.level_snapshot(price)
    }

    pub fn next_expected(&self) -> Result<u64, FeedError> {
        Ok(self.read()?.next_expected())
    }

    pub fn pending_len(&self) -> Result<usize, FeedError> {
        Ok(self.read()?.gate.pending_len())
    }

    /// Sequence ranges still missing behind parked updates.
    pub fn missing_ranges(&self) -> Result<Vec<GapRange>, FeedError> {
        Ok(self.read()?.gate.missing_ranges())
    }

    pub fn order_count(&self) -> Result<usize, FeedError> {
        Ok(self.read()?.order_count())
    }

    /// Checksum of the current orders, levels and expected sequence.
    pub fn state_checksum(&self) -> Result<String, FeedError> {
        Ok(self.read()?.checksum())
    }

    pub fn metrics(&self) -> &FeedMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FeedHandlerConfig {
        &self.config
    }

    /// Evaluate the configured alert thresholds against current metrics.
    pub fn check_alerts(&self) -> Vec<Alert> {
        self.metrics
            .check_thresholds(&self.config.alert_thresholds)
    }

    // ── Recovery hooks ──────────────────────────────────────────────────

    /// Move the expected sequence number forward.
    ///
    /// Returns the sequences of parked updates discarded as stale. A value
    /// below the current expected sequence is rejected with
    /// `SequenceRegression`; rewinding is only possible through `restore`.
    pub fn set_next_expected(&self, sequence: u64) -> Result<Vec<u64>, FeedError> {
        let mut state = self.write()?;
        let stale = state.gate.set_next_expected(sequence)?;
        self.metrics.set_pending_depth(state.gate.pending_len());
        let discarded = self.report_discarded(stale);
        self.emit(&FeedEvent::Recovered {
            next_expected: sequence,
            orders: state.order_count(),
        });
        Ok(discarded)
    }

    /// Drop every parked update without applying it.
    pub fn discard_pending(&self) -> Result<Vec<u64>, FeedError> {
        let mut state = self.write()?;
        let dropped = state.gate.discard_pending();
        self.metrics.set_pending_depth(0);
        Ok(self.report_discarded(dropped))
    }

    /// Load known live orders without sequence validation.
    ///
    /// Each update is applied as a New order, ordered by entry timestamp so
    /// every level's history is built in time order. All or nothing: on the
    /// first error no order is loaded.
    pub fn preload<I>(&self, updates: I) -> Result<usize, FeedError>
    where
        I: IntoIterator<Item = OrderUpdate>,
    {
        let mut batch: Vec<OrderUpdate> = updates.into_iter().collect();
        batch.sort_by_key(|u| (u.entry_timestamp, u.sequence));

        let mut state = self.write()?;
        let mut staged = state.clone();
        for update in &batch {
            staged.apply_new(update)?;
        }
        *state = staged;

        self.emit(&FeedEvent::Recovered {
            next_expected: state.next_expected(),
            orders: state.order_count(),
        });
        Ok(batch.len())
    }

    /// Export the current state as a checksummed snapshot.
    pub fn snapshot(&self) -> Result<RecoverySnapshot, FeedError> {
        Ok(self.read()?.capture())
    }

    /// Replace orders, levels and the expected sequence with a snapshot.
    ///
    /// Parked updates at or beyond the snapshot's expected sequence are kept
    /// and can be drained afterwards.
    pub fn restore(&self, snapshot: &RecoverySnapshot) -> Result<(), FeedError> {
        let mut state = self.write()?;
        let stale = state.restore(snapshot)?;
        self.metrics.set_pending_depth(state.gate.pending_len());
        self.report_discarded(stale);
        self.emit(&FeedEvent::Recovered {
            next_expected: snapshot.next_expected,
            orders: state.order_count(),
        });
        Ok(())
    }

    fn report_discarded(&self, updates: Vec<WireOrderUpdate>) -> Vec<u64> {
        let sequences: Vec<u64> = updates.iter().map(Sequenced::sequence).collect();
        if !sequences.is_empty() {
            self.emit(&FeedEvent::Discarded {
                sequences: sequences.clone(),
            });
        }
        sequences
    }

    fn emit(&self, event: &FeedEvent) {
        self.metrics.on_event(event);
        self.observer.on_event(event);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, FeedState>, FeedError> {
        self.state.read().map_err(|_| FeedError::StatePoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, FeedState>, FeedError> {
        self.state.write().map_err(|_| FeedError::StatePoisoned)
    }
}

impl Default for FeedHandler {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;
    use crate::sequence::SequenceError;
    use crate::telemetry::RecordingObserver;
    use feed_types::order::Side;

    fn update(
        seq: u64,
        kind: UpdateKind,
        order_id: i64,
        ts: i64,
        price: i64,
        qty: i64,
    ) -> OrderUpdate {
        OrderUpdate {
            sequence: seq,
            kind,
            client_id: 411,
            order_id,
            entry_timestamp: ts,
            instrument_id: 1,
            side: Side::BUY,
            price,
            quantity: qty,
        }
    }

    fn new_order(seq: u64, order_id: i64, ts: i64, price: i64, qty: i64) -> OrderUpdate {
        update(seq, UpdateKind::New, order_id, ts, price, qty)
    }

    #[test]
    fn test_new_order_recorded() {
        let handler = FeedHandler::with_defaults();
        let admission = handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();

        assert_eq!(
            admission,
            Admission::Applied {
                sequence: 1,
                drained: None,
            }
        );
        assert_eq!(handler.volume_ahead_of(411, 1).unwrap(), 0);
        assert_eq!(handler.order_by_key(411, 1).unwrap().quantity, 40);
        assert_eq!(handler.next_expected().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_sequence_does_not_mutate() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        let before = handler.state_checksum().unwrap();

        let err = handler.admit(new_order(1, 9, 9, 101, 99)).unwrap_err();
        assert!(matches!(
            err,
            FeedError::Sequence(SequenceError::DuplicateOrStaleSequence { sequence: 1, .. })
        ));
        assert_eq!(handler.state_checksum().unwrap(), before);
        assert!(handler.order_by_key(411, 9).is_err());
    }

    #[test]
    fn test_duplicate_order_key_rejected_but_sequence_consumed() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();

        let err = handler.admit(new_order(2, 1, 2, 101, 10)).unwrap_err();
        assert_eq!(
            err,
            FeedError::Order(OrderTableError::DuplicateOrderKey(OrderKey::new(411, 1)))
        );
        assert_eq!(handler.next_expected().unwrap(), 3);
        // Ledger untouched by the rejected update
        assert_eq!(handler.level_snapshot(101).unwrap().entry_count, 1);
    }

    #[test]
    fn test_non_monotonic_timestamp_rejected_atomically() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 10, 101, 40)).unwrap();

        let err = handler.admit(new_order(2, 2, 5, 101, 10)).unwrap_err();
        assert_eq!(
            err,
            FeedError::Ledger(LedgerError::NonMonotonicTimestamp {
                price: 101,
                timestamp: 5,
                last: 10,
            })
        );
        assert!(handler.order_by_key(411, 2).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cancel_reduces_future_volume_only() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler.admit(new_order(2, 2, 2, 101, 60)).unwrap();
        handler
            .admit(update(3, UpdateKind::Cancel, 1, 1, 101, 0))
            .unwrap();

        assert!(handler.order_by_key(411, 1).unwrap_err().is_not_found());
        assert_eq!(handler.volume_ahead_of(411, 2).unwrap(), 40);
        handler.admit(new_order(4, 3, 3, 101, 5)).unwrap();
        assert_eq!(handler.volume_ahead_of(411, 3).unwrap(), 60);
    }

    #[test]
    fn test_cancel_unknown_order() {
        let handler = FeedHandler::with_defaults();
        let err = handler
            .admit(update(1, UpdateKind::Cancel, 7, 1, 101, 0))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(handler.next_expected().unwrap(), 2);
    }

    #[test]
    fn test_change_reduces_quantity_in_place() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler
            .admit(update(2, UpdateKind::Change, 1, 1, 101, 25))
            .unwrap();

        let record = handler.order_by_key(411, 1).unwrap();
        assert_eq!(record.quantity, 25);
        assert_eq!(record.last_sequence, 2);
        assert_eq!(handler.volume_ahead_of(411, 1).unwrap(), 0);
        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 25);
    }

    #[test]
    fn test_change_increases_quantity_in_place() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler
            .admit(update(2, UpdateKind::Change, 1, 1, 101, 70))
            .unwrap();

        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 70);
        assert_eq!(handler.level_snapshot(101).unwrap().entry_count, 1);
    }

    #[test]
    fn test_change_price_moves_order() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler.admit(new_order(2, 2, 2, 102, 30)).unwrap();
        handler
            .admit(update(3, UpdateKind::Change, 1, 3, 102, 40))
            .unwrap();

        let record = handler.order_by_key(411, 1).unwrap();
        assert_eq!(record.price, 102);
        assert_eq!(record.entry_timestamp, 3);
        assert_eq!(handler.volume_ahead_of(411, 1).unwrap(), 30);
        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 0);
        assert_eq!(handler.level_snapshot(102).unwrap().resting_volume, 70);
    }

    #[test]
    fn test_change_new_timestamp_requeues_at_same_price() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler.admit(new_order(2, 2, 2, 101, 60)).unwrap();
        handler
            .admit(update(3, UpdateKind::Change, 1, 3, 101, 50))
            .unwrap();

        // Order 1 now sits behind order 2 only
        assert_eq!(handler.volume_ahead_of(411, 1).unwrap(), 60);
        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 110);
    }

    #[test]
    fn test_price_amend_can_be_disabled() {
        let config = FeedHandlerConfig {
            allow_price_amend: false,
            ..FeedHandlerConfig::default()
        };
        let handler = FeedHandler::new(config);
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        let before = checksum_at(&handler, 2);

        let err = handler
            .admit(update(2, UpdateKind::Change, 1, 2, 105, 40))
            .unwrap_err();
        assert_eq!(err, FeedError::PriceAmendNotAllowed(OrderKey::new(411, 1)));
        assert_eq!(handler.order_by_key(411, 1).unwrap().price, 101);
        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 40);
        assert!(handler.level_snapshot(105).is_err());
        assert_eq!(checksum_at(&handler, 2), before);
    }

    /// Checksum of `handler` as if its expected sequence were `next_expected`.
    fn checksum_at(handler: &FeedHandler, next_expected: u64) -> String {
        let snap = handler.snapshot().unwrap();
        compute_checksum(next_expected, &snap.orders, &snap.levels)
    }

    #[test]
    fn test_rejected_reprice_leaves_both_levels_untouched() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler.admit(new_order(2, 2, 10, 102, 30)).unwrap();
        let before = checksum_at(&handler, 3);

        // Old level would accept the removal; new level refuses timestamp 5
        let err = handler
            .admit(update(3, UpdateKind::Change, 1, 5, 102, 40))
            .unwrap_err();
        assert_eq!(
            err,
            FeedError::Ledger(LedgerError::NonMonotonicTimestamp {
                price: 102,
                timestamp: 5,
                last: 10,
            })
        );

        assert_eq!(checksum_at(&handler, 3), before);
        let record = handler.order_by_key(411, 1).unwrap();
        assert_eq!((record.price, record.entry_timestamp, record.last_sequence), (101, 1, 1));
        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 40);
        assert_eq!(handler.level_snapshot(101).unwrap().removed_volume, 0);
        assert_eq!(handler.level_snapshot(102).unwrap().resting_volume, 30);
        assert_eq!(handler.level_snapshot(102).unwrap().entry_count, 1);
    }

    #[test]
    fn test_rejected_same_level_requeue_leaves_state_untouched() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 5, 101, 40)).unwrap();
        handler.admit(new_order(2, 2, 10, 101, 60)).unwrap();
        let before = checksum_at(&handler, 3);

        // Newer than its own entry but older than the level's last one
        let err = handler
            .admit(update(3, UpdateKind::Change, 1, 7, 101, 20))
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::Ledger(LedgerError::NonMonotonicTimestamp { timestamp: 7, last: 10, .. })
        ));

        assert_eq!(handler.next_expected().unwrap(), 4);
        assert_eq!(checksum_at(&handler, 3), before);
        assert_eq!(handler.order_by_key(411, 1).unwrap().quantity, 40);
        assert_eq!(handler.level_snapshot(101).unwrap().resting_volume, 100);
    }

    #[test]
    fn test_rejected_size_increase_leaves_state_untouched() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, i64::MAX - 10)).unwrap();
        handler.admit(new_order(2, 2, 2, 101, 5)).unwrap();
        let before = checksum_at(&handler, 3);

        let err = handler
            .admit(update(3, UpdateKind::Change, 1, 1, 101, i64::MAX - 4))
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::Ledger(LedgerError::VolumeOverflow { .. })
        ));
        assert_eq!(checksum_at(&handler, 3), before);
        assert_eq!(handler.order_by_key(411, 1).unwrap().quantity, i64::MAX - 10);
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let handler = FeedHandler::with_defaults();
        let err = handler.admit(new_order(1, 1, 1, 101, 0)).unwrap_err();
        assert!(matches!(err, FeedError::InvalidQuantity { quantity: 0, .. }));
        assert!(handler.level_snapshot(101).is_err());
    }

    #[test]
    fn test_unknown_kind_consumes_sequence() {
        let observer = Arc::new(RecordingObserver::new());
        let handler = FeedHandler::with_observer(FeedHandlerConfig::default(), observer.clone());

        let mut wire = WireOrderUpdate::from(new_order(1, 1, 1, 101, 40));
        wire.kind = 7;
        assert_eq!(
            handler.admit_wire(wire).unwrap_err(),
            FeedError::UnsupportedUpdateKind(7)
        );
        assert_eq!(handler.next_expected().unwrap(), 2);
        assert_eq!(observer.labels(), vec!["Rejected"]);
    }

    #[test]
    fn test_buffer_then_drain() {
        let handler = FeedHandler::with_defaults();
        let admission = handler.admit(new_order(2, 2, 2, 101, 10)).unwrap();
        assert_eq!(
            admission,
            Admission::Buffered {
                gap: GapRange {
                    from_sequence: 1,
                    to_sequence: 1,
                },
            }
        );
        assert_eq!(handler.pending_len().unwrap(), 1);

        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        let report = handler.drain_pending().unwrap();
        assert_eq!(report.applied, vec![2]);
        assert_eq!(handler.volume_ahead_of(411, 2).unwrap(), 40);
    }

    #[test]
    fn test_drain_continues_past_rejection() {
        let handler = FeedHandler::with_defaults();
        handler
            .admit(update(2, UpdateKind::Cancel, 99, 1, 101, 0))
            .unwrap();
        handler.admit(new_order(3, 3, 3, 101, 10)).unwrap();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();

        let report = handler.drain_pending().unwrap();
        assert_eq!(report.applied, vec![3]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 2);
        assert!(report.rejected[0].1.is_not_found());
        assert_eq!(report.admitted(), 2);
    }

    #[test]
    fn test_auto_drain() {
        let config = FeedHandlerConfig {
            auto_drain: true,
            ..FeedHandlerConfig::default()
        };
        let handler = FeedHandler::new(config);
        handler.admit(new_order(3, 3, 3, 103, 40)).unwrap();
        handler.admit(new_order(2, 2, 2, 102, 40)).unwrap();

        let admission = handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        match admission {
            Admission::Applied {
                drained: Some(report),
                ..
            } => assert_eq!(report.applied, vec![2, 3]),
            other => panic!("Expected drained admission, got {:?}", other),
        }
        assert_eq!(handler.order_count().unwrap(), 3);
    }

    #[test]
    fn test_preload_and_set_next_expected() {
        let handler = FeedHandler::with_defaults();
        let loaded = handler
            .preload(vec![
                new_order(0, 2, 20, 101, 60),
                new_order(0, 1, 10, 101, 40),
            ])
            .unwrap();
        assert_eq!(loaded, 2);
        // Preload orders by entry timestamp
        assert_eq!(handler.volume_ahead_of(411, 1).unwrap(), 0);
        assert_eq!(handler.volume_ahead_of(411, 2).unwrap(), 40);

        handler.set_next_expected(50).unwrap();
        handler.admit(new_order(50, 3, 30, 101, 1)).unwrap();
        assert_eq!(handler.volume_ahead_of(411, 3).unwrap(), 100);
    }

    #[test]
    fn test_preload_is_all_or_nothing() {
        let handler = FeedHandler::with_defaults();
        let err = handler
            .preload(vec![
                new_order(0, 1, 10, 101, 40),
                new_order(0, 1, 11, 101, 40),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::Order(OrderTableError::DuplicateOrderKey(_))
        ));
        assert_eq!(handler.order_count().unwrap(), 0);
    }

    #[test]
    fn test_set_next_expected_discards_stale_pending() {
        let observer = Arc::new(RecordingObserver::new());
        let handler = FeedHandler::with_observer(FeedHandlerConfig::default(), observer.clone());
        handler.admit(new_order(3, 3, 3, 101, 1)).unwrap();
        handler.admit(new_order(9, 9, 9, 101, 1)).unwrap();

        assert_eq!(handler.set_next_expected(5).unwrap(), vec![3]);
        assert_eq!(handler.pending_len().unwrap(), 1);
        assert!(observer.labels().contains(&"Discarded"));
    }

    #[test]
    fn test_set_next_expected_rejects_rewind() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        handler.admit(new_order(2, 2, 2, 101, 60)).unwrap();
        let before = handler.state_checksum().unwrap();

        let err = handler.set_next_expected(1).unwrap_err();
        assert_eq!(
            err,
            FeedError::Sequence(SequenceError::SequenceRegression {
                requested: 1,
                next_expected: 3,
            })
        );

        // Sequence 1 stays consumed
        assert!(handler.admit(new_order(1, 9, 9, 101, 5)).is_err());
        assert!(handler.order_by_key(411, 9).unwrap_err().is_not_found());
        assert_eq!(handler.state_checksum().unwrap(), before);
    }

    #[test]
    fn test_sequence_beyond_int64_rejected() {
        let handler = FeedHandler::with_defaults();
        let err = handler.admit(new_order(u64::MAX, 1, 1, 101, 40)).unwrap_err();
        assert!(matches!(
            err,
            FeedError::Sequence(SequenceError::SequenceOutOfRange { sequence: u64::MAX, .. })
        ));
        assert_eq!(handler.pending_len().unwrap(), 0);
        assert!(handler.missing_ranges().unwrap().is_empty());
        assert_eq!(handler.metrics().export()["sequences_rejected"], 1);
    }

    #[test]
    fn test_pending_depth_follows_discards() {
        let config = FeedHandlerConfig {
            alert_thresholds: crate::metrics::AlertThresholds {
                max_pending_depth: 0,
                ..Default::default()
            },
            ..FeedHandlerConfig::default()
        };
        let handler = FeedHandler::new(config);
        handler.admit(new_order(3, 3, 3, 101, 1)).unwrap();
        assert_eq!(handler.metrics().export()["pending_depth"], 1);

        handler.set_next_expected(10).unwrap();
        assert_eq!(handler.pending_len().unwrap(), 0);
        assert_eq!(handler.metrics().export()["pending_depth"], 0);
        assert!(handler
            .check_alerts()
            .iter()
            .all(|alert| alert.metric != "pending_depth"));

        // Restore drops the stale parked update as well
        let snap = FeedHandler::with_defaults().snapshot().unwrap();
        let restored = FeedHandler::with_defaults();
        restored.admit(new_order(5, 5, 5, 101, 1)).unwrap();
        let checksum = compute_checksum(6, &snap.orders, &snap.levels);
        restored
            .restore(&RecoverySnapshot {
                next_expected: 6,
                checksum,
                ..snap
            })
            .unwrap();
        assert_eq!(restored.pending_len().unwrap(), 0);
        assert_eq!(restored.metrics().export()["pending_depth"], 0);
    }

    #[test]
    fn test_restore_may_rewind_sequence() {
        let source = FeedHandler::with_defaults();
        source.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        let snap = source.snapshot().unwrap();

        let target = FeedHandler::with_defaults();
        target.set_next_expected(100).unwrap();
        target.restore(&snap).unwrap();
        assert_eq!(target.next_expected().unwrap(), 2);
    }

    #[test]
    fn test_restore_rejects_out_of_range_sequence() {
        let snap = FeedHandler::with_defaults().snapshot().unwrap();
        let checksum = compute_checksum(u64::MAX, &snap.orders, &snap.levels);
        let bogus = RecoverySnapshot {
            next_expected: u64::MAX,
            checksum,
            ..snap
        };

        let target = FeedHandler::with_defaults();
        target.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        assert!(matches!(
            target.restore(&bogus),
            Err(FeedError::Sequence(SequenceError::SequenceOutOfRange { .. }))
        ));
        assert_eq!(target.order_count().unwrap(), 1);
        assert_eq!(target.next_expected().unwrap(), 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let source = FeedHandler::with_defaults();
        source.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        source.admit(new_order(2, 2, 2, 101, 60)).unwrap();
        let snap = source.snapshot().unwrap();

        let target = FeedHandler::with_defaults();
        target.restore(&snap).unwrap();
        assert_eq!(target.volume_ahead_of(411, 2).unwrap(), 40);
        assert_eq!(target.next_expected().unwrap(), 3);
        assert_eq!(
            target.state_checksum().unwrap(),
            source.state_checksum().unwrap()
        );
    }

    #[test]
    fn test_restore_rejects_tampered_snapshot() {
        let source = FeedHandler::with_defaults();
        source.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        let mut snap = source.snapshot().unwrap();
        snap.next_expected = 99;

        let target = FeedHandler::with_defaults();
        assert!(matches!(
            target.restore(&snap),
            Err(FeedError::ChecksumMismatch { .. })
        ));
        assert_eq!(target.next_expected().unwrap(), 1);
    }

    #[test]
    fn test_metrics_track_dispatch() {
        let handler = FeedHandler::with_defaults();
        handler.admit(new_order(1, 1, 1, 101, 40)).unwrap();
        let _ = handler.admit(new_order(1, 1, 1, 101, 40));
        handler.admit(new_order(3, 3, 3, 101, 40)).unwrap();

        let exported = handler.metrics().export();
        assert_eq!(exported["orders_added"], 1);
        assert_eq!(exported["sequences_rejected"], 1);
        assert_eq!(exported["updates_buffered"], 1);
        assert_eq!(exported["pending_depth"], 1);
    }
}
