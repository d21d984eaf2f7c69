//! In-memory metrics for monitoring capture health.
//!
//! Lock-free atomics; single writer per counter, any number of readers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance - lock-free atomics for counters
pub static METRICS: Metrics = Metrics::new();

/// Capture metrics - all fields are atomic for thread-safe access
pub struct Metrics {
    // Discovery counters
    pub datasets_discovered: AtomicU64,
    pub renames_applied: AtomicU64,
    pub events_coalesced: AtomicU64,
    pub events_dropped: AtomicU64,

    // Resolution counters
    pub resolutions: AtomicU64,
    pub resolution_failures: AtomicU64,

    // Trigger counters
    pub triggers_sent: AtomicU64,
    pub trigger_failures: AtomicU64,
    pub duplicates_detected: AtomicU64,
    pub triggers_aborted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            datasets_discovered: AtomicU64::new(0),
            renames_applied: AtomicU64::new(0),
            events_coalesced: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            resolutions: AtomicU64::new(0),
            resolution_failures: AtomicU64::new(0),
            triggers_sent: AtomicU64::new(0),
            trigger_failures: AtomicU64::new(0),
            duplicates_detected: AtomicU64::new(0),
            triggers_aborted: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datasets_discovered: self.datasets_discovered.load(Ordering::Relaxed),
            renames_applied: self.renames_applied.load(Ordering::Relaxed),
            events_coalesced: self.events_coalesced.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            triggers_sent: self.triggers_sent.load(Ordering::Relaxed),
            trigger_failures: self.trigger_failures.load(Ordering::Relaxed),
            duplicates_detected: self.duplicates_detected.load(Ordering::Relaxed),
            triggers_aborted: self.triggers_aborted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datasets_discovered: u64,
    pub renames_applied: u64,
    pub events_coalesced: u64,
    pub events_dropped: u64,
    pub resolutions: u64,
    pub resolution_failures: u64,
    pub triggers_sent: u64,
    pub trigger_failures: u64,
    pub duplicates_detected: u64,
    pub triggers_aborted: u64,
}

/// Increment helper - saves typing `Ordering::Relaxed` at call sites.
pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
