//! Run-wide counters.
//!
//! All counters are monotonic `AtomicU64`s updated with relaxed ordering;
//! readers take a `RunMetrics` snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RunMetricsStorage {
    pub(crate) items_submitted: AtomicU64,
    pub(crate) items_completed: AtomicU64,
    pub(crate) items_failed: AtomicU64,
    pub(crate) auto_flushes: AtomicU64,
    pub(crate) manual_flushes: AtomicU64,
    pub(crate) empty_flushes: AtomicU64,
    pub(crate) flush_failures: AtomicU64,
    pub(crate) items_flushed: AtomicU64,
}

impl RunMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunMetrics {
        RunMetrics {
            items_submitted: self.items_submitted.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            auto_flushes: self.auto_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
            empty_flushes: self.empty_flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            items_flushed: self.items_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `RunMetricsStorage`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    pub items_submitted: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    /// Flushes fired from inside `enqueue` when the queue reached batch size.
    pub auto_flushes: u64,
    /// Explicit flushes that wrote a non-empty batch.
    pub manual_flushes: u64,
    /// Explicit flushes on an empty queue.
    pub empty_flushes: u64,
    pub flush_failures: u64,
    pub items_flushed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let storage = RunMetricsStorage::new();
        RunMetricsStorage::increment(&storage.items_submitted);
        RunMetricsStorage::increment(&storage.items_submitted);
        RunMetricsStorage::add(&storage.items_flushed, 4);

        let snapshot = storage.snapshot();
        assert_eq!(snapshot.items_submitted, 2);
        assert_eq!(snapshot.items_flushed, 4);
        assert_eq!(snapshot.auto_flushes, 0);
    }
}
