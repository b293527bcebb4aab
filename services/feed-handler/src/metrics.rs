//! Counters and latency tracking for the feed handler
//!
//! Lock-free counters for every telemetry event plus a bounded dispatch
//! latency tracker. Exported as a flat map for Prometheus-style exposition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use feed_types::order::UpdateKind;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::telemetry::{FeedEvent, FeedObserver};

/// Core metrics for the feed handler.
pub struct FeedMetrics {
    // Admission
    pub updates_applied: AtomicU64,
    pub updates_buffered: AtomicU64,
    pub sequences_rejected: AtomicU64,
    pub pending_discarded: AtomicU64,

    // Dispatch
    pub orders_added: AtomicU64,
    pub orders_changed: AtomicU64,
    pub orders_canceled: AtomicU64,
    pub dispatch_rejected: AtomicU64,
    pub dispatch_ns: Mutex<LatencyTracker>,

    // Gauges
    pub pending_depth: AtomicU64,
    pub recoveries: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            updates_applied: AtomicU64::new(0),
            updates_buffered: AtomicU64::new(0),
            sequences_rejected: AtomicU64::new(0),
            pending_discarded: AtomicU64::new(0),
            orders_added: AtomicU64::new(0),
            orders_changed: AtomicU64::new(0),
            orders_canceled: AtomicU64::new(0),
            dispatch_rejected: AtomicU64::new(0),
            dispatch_ns: Mutex::new(LatencyTracker::new(1000)),
            pending_depth: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Record how long a single dispatch took.
    pub fn record_dispatch_latency(&self, latency_ns: u64) {
        if let Ok(mut tracker) = self.dispatch_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Update the pending buffer depth gauge.
    pub fn set_pending_depth(&self, depth: usize) {
        self.pending_depth.store(depth as u64, Ordering::Relaxed);
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let seq_rejected = self.sequences_rejected.load(Ordering::Relaxed);
        if seq_rejected > thresholds.max_sequence_rejections {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "sequences_rejected".to_string(),
                message: format!(
                    "Sequence rejections: {} > threshold {}",
                    seq_rejected, thresholds.max_sequence_rejections
                ),
            });
        }

        let dispatch_rejected = self.dispatch_rejected.load(Ordering::Relaxed);
        if dispatch_rejected > thresholds.max_dispatch_rejections {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "dispatch_rejected".to_string(),
                message: format!(
                    "Dispatch rejections: {} > threshold {}",
                    dispatch_rejected, thresholds.max_dispatch_rejections
                ),
            });
        }

        let depth = self.pending_depth.load(Ordering::Relaxed);
        if depth > thresholds.max_pending_depth {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "pending_depth".to_string(),
                message: format!(
                    "Pending depth: {} > threshold {}",
                    depth, thresholds.max_pending_depth
                ),
            });
        }

        if let Ok(tracker) = self.dispatch_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_dispatch_p99_ns {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "dispatch_p99".to_string(),
                        message: format!(
                            "Dispatch p99: {}ns > threshold {}ns",
                            p99, thresholds.max_dispatch_p99_ns
                        ),
                    });
                }
            }
        }

        alerts
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("updates_applied".to_string(), self.updates_applied.load(Ordering::Relaxed));
        m.insert("updates_buffered".to_string(), self.updates_buffered.load(Ordering::Relaxed));
        m.insert("sequences_rejected".to_string(), self.sequences_rejected.load(Ordering::Relaxed));
        m.insert("pending_discarded".to_string(), self.pending_discarded.load(Ordering::Relaxed));
        m.insert("orders_added".to_string(), self.orders_added.load(Ordering::Relaxed));
        m.insert("orders_changed".to_string(), self.orders_changed.load(Ordering::Relaxed));
        m.insert("orders_canceled".to_string(), self.orders_canceled.load(Ordering::Relaxed));
        m.insert("dispatch_rejected".to_string(), self.dispatch_rejected.load(Ordering::Relaxed));
        m.insert("pending_depth".to_string(), self.pending_depth.load(Ordering::Relaxed));
        m.insert("recoveries".to_string(), self.recoveries.load(Ordering::Relaxed));
        m
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedObserver for FeedMetrics {
    fn on_event(&self, event: &FeedEvent) {
        match event {
            FeedEvent::Applied { kind, .. } => {
                self.updates_applied.fetch_add(1, Ordering::Relaxed);
                let counter = match kind {
                    UpdateKind::New => &self.orders_added,
                    UpdateKind::Change => &self.orders_changed,
                    UpdateKind::Cancel => &self.orders_canceled,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            FeedEvent::Buffered { .. } => {
                self.updates_buffered.fetch_add(1, Ordering::Relaxed);
            }
            FeedEvent::Rejected { error, .. } => {
                let counter = match error {
                    FeedError::Sequence(_) => &self.sequences_rejected,
                    _ => &self.dispatch_rejected,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            FeedEvent::Drained { pending, .. } => self.set_pending_depth(*pending),
            FeedEvent::Discarded { sequences } => {
                self.pending_discarded
                    .fetch_add(sequences.len() as u64, Ordering::Relaxed);
            }
            FeedEvent::Recovered { .. } => {
                self.recoveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Configurable alert thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Max duplicate/stale or overflow rejections before alert.
    pub max_sequence_rejections: u64,
    /// Max dispatch-level rejections (data-quality signal) before critical alert.
    pub max_dispatch_rejections: u64,
    /// Max parked out-of-order updates before alert.
    pub max_pending_depth: u64,
    /// Max dispatch p99 latency in nanoseconds.
    pub max_dispatch_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_sequence_rejections: 100,
            max_dispatch_rejections: 10,
            max_pending_depth: 10_000,
            max_dispatch_p99_ns: 100_000, // 100µs
        }
    }
}
