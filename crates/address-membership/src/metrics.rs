//! Operation counters for a membership store
//!
//! Lock-free counters that the store updates on every operation. Take a
//! [`StoreMetricsSnapshot`] to export them to whatever metrics system the
//! embedder runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for store operations
#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Addresses accepted by `add_address`
    pub addresses_added: AtomicU64,
    /// Addresses rejected by the normalizer (add or check)
    pub addresses_rejected: AtomicU64,
    /// Total lookups performed
    pub lookups_performed: AtomicU64,
    /// Lookups answering "possibly present"
    pub lookups_positive: AtomicU64,
    /// Cumulative lookup time in nanoseconds
    pub lookup_time_ns: AtomicU64,
    /// Successful filter replacements
    pub reloads_succeeded: AtomicU64,
    /// Reload attempts that left the filter untouched
    pub reloads_failed: AtomicU64,
    /// Successful saves
    pub saves_completed: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&self) {
        self.addresses_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.addresses_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record lookup operation
    ///
    /// # Arguments
    /// * `duration` - Time taken for lookup
    /// * `found` - Whether the filter answered "possibly present"
    pub fn record_lookup(&self, duration: Duration, found: bool) {
        self.lookups_performed.fetch_add(1, Ordering::Relaxed);
        self.lookup_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        if found {
            self.lookups_positive.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reload(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.reloads_succeeded
        } else {
            &self.reloads_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self) {
        self.saves_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Average lookup time in nanoseconds
    pub fn avg_lookup_time_ns(&self) -> u64 {
        let total = self.lookup_time_ns.load(Ordering::Relaxed);
        let count = self.lookups_performed.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }

    /// Ratio of positive lookups to all lookups
    ///
    /// Includes true positives, so it bounds the false positive rate only
    /// when probing addresses known to be absent.
    pub fn observed_positive_rate(&self) -> f64 {
        let total = self.lookups_performed.load(Ordering::Relaxed);
        let positive = self.lookups_positive.load(Ordering::Relaxed);
        if total > 0 {
            positive as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            addresses_added: self.addresses_added.load(Ordering::Relaxed),
            addresses_rejected: self.addresses_rejected.load(Ordering::Relaxed),
            lookups_performed: self.lookups_performed.load(Ordering::Relaxed),
            lookups_positive: self.lookups_positive.load(Ordering::Relaxed),
            avg_lookup_ns: self.avg_lookup_time_ns(),
            reloads_succeeded: self.reloads_succeeded.load(Ordering::Relaxed),
            reloads_failed: self.reloads_failed.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreMetricsSnapshot {
    pub addresses_added: u64,
    pub addresses_rejected: u64,
    pub lookups_performed: u64,
    pub lookups_positive: u64,
    pub avg_lookup_ns: u64,
    pub reloads_succeeded: u64,
    pub reloads_failed: u64,
    pub saves_completed: u64,
}
