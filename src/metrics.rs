//! Transform counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transformer metrics (thread-safe counters).
#[derive(Debug, Clone)]
pub struct RedirectorMetrics {
    /// Units handed to the transformer
    pub units_seen: Arc<AtomicU64>,
    /// Units rejected by the constant pool pre-filter
    pub units_skipped: Arc<AtomicU64>,
    /// Units fully decoded
    pub units_decoded: Arc<AtomicU64>,
    /// Decoded units that had no matching site
    pub units_unchanged: Arc<AtomicU64>,
    /// Units re-encoded after rewriting
    pub units_rewritten: Arc<AtomicU64>,
    /// Individual instruction sites rewritten
    pub sites_rewritten: Arc<AtomicU64>,
    /// Snapshot writes that failed
    pub dump_failures: Arc<AtomicU64>,
}

impl Default for RedirectorMetrics {
    fn default() -> Self {
        Self {
            units_seen: Arc::new(AtomicU64::new(0)),
            units_skipped: Arc::new(AtomicU64::new(0)),
            units_decoded: Arc::new(AtomicU64::new(0)),
            units_unchanged: Arc::new(AtomicU64::new(0)),
            units_rewritten: Arc::new(AtomicU64::new(0)),
            sites_rewritten: Arc::new(AtomicU64::new(0)),
            dump_failures: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl RedirectorMetrics {
    pub fn record_seen(&self) {
        self.units_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.units_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoded(&self) {
        self.units_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.units_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rewritten unit and the number of sites it touched.
    pub fn record_rewritten(&self, sites: u64) {
        self.units_rewritten.fetch_add(1, Ordering::Relaxed);
        self.sites_rewritten.fetch_add(sites, Ordering::Relaxed);
    }

    pub fn record_dump_failure(&self) {
        self.dump_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_seen: self.units_seen.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            units_decoded: self.units_decoded.load(Ordering::Relaxed),
            units_unchanged: self.units_unchanged.load(Ordering::Relaxed),
            units_rewritten: self.units_rewritten.load(Ordering::Relaxed),
            sites_rewritten: self.sites_rewritten.load(Ordering::Relaxed),
            dump_failures: self.dump_failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.units_seen.store(0, Ordering::Relaxed);
        self.units_skipped.store(0, Ordering::Relaxed);
        self.units_decoded.store(0, Ordering::Relaxed);
        self.units_unchanged.store(0, Ordering::Relaxed);
        self.units_rewritten.store(0, Ordering::Relaxed);
        self.sites_rewritten.store(0, Ordering::Relaxed);
        self.dump_failures.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics (for reporting).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub units_seen: u64,
    pub units_skipped: u64,
    pub units_decoded: u64,
    pub units_unchanged: u64,
    pub units_rewritten: u64,
    pub sites_rewritten: u64,
    pub dump_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of seen units the pre-filter rejected.
    pub fn skip_rate(&self) -> f64 {
        if self.units_seen == 0 {
            0.0
        } else {
            self.units_skipped as f64 / self.units_seen as f64
        }
    }
}
