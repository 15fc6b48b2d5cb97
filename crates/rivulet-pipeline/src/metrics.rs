//! Lock-free per-reader metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-reader counters using atomics (no locks on the data path).
#[derive(Debug, Default)]
pub struct ReaderMetrics {
    /// Completed batch cycles.
    pub batches: AtomicU64,
    /// Log records read across all batches.
    pub records_read: AtomicU64,
    /// Log entries inspected across all batches.
    pub entries_read: AtomicU64,
    /// Events published to the bus.
    pub events_published: AtomicU64,
    /// Failed batch cycles.
    pub errors: AtomicU64,
}

impl ReaderMetrics {
    /// Records a completed batch cycle.
    pub fn record_batch(&self, records: u64, entries: u64, published: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records_read.fetch_add(records, Ordering::Relaxed);
        self.entries_read.fetch_add(entries, Ordering::Relaxed);
        self.events_published.fetch_add(published, Ordering::Relaxed);
    }

    /// Records a failed batch cycle.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ReaderMetricsSnapshot {
        ReaderMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of reader metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderMetricsSnapshot {
    /// Completed batch cycles.
    pub batches: u64,
    /// Log records read.
    pub records_read: u64,
    /// Log entries inspected.
    pub entries_read: u64,
    /// Events published.
    pub events_published: u64,
    /// Failed batch cycles.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recordings() {
        let metrics = ReaderMetrics::default();
        metrics.record_batch(3, 5, 2);
        metrics.record_batch(1, 1, 0);
        metrics.record_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.records_read, 4);
        assert_eq!(snap.entries_read, 6);
        assert_eq!(snap.events_published, 2);
        assert_eq!(snap.errors, 1);
    }
}
