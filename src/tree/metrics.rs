use std::sync::atomic::{AtomicU64, Ordering};

/// Index-maintenance counters, bumped by converters on the write path
/// and by the index worker as runs are applied.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    pub batches_enqueued: AtomicU64,
    pub batches_applied: AtomicU64,
    pub items_enqueued: AtomicU64,
    pub items_applied: AtomicU64,
}

impl IndexMetrics {
    pub fn snapshot(&self, index_levels: usize, leaf_entries: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_enqueued: self.batches_enqueued.load(Ordering::Relaxed),
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            items_enqueued: self.items_enqueued.load(Ordering::Relaxed),
            items_applied: self.items_applied.load(Ordering::Relaxed),
            index_levels,
            leaf_entries,
        }
    }
}

/// Point-in-time view of the diagnostic counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Runs handed to the index worker.
    pub batches_enqueued: u64,
    /// Runs the worker has applied.
    pub batches_applied: u64,
    /// Data blocks handed to the index worker.
    pub items_enqueued: u64,
    /// Data blocks the worker has applied.
    pub items_applied: u64,
    /// Search index levels, counting the leaf level.
    pub index_levels: usize,
    /// Leaf entries in the published search snapshot.
    pub leaf_entries: usize,
}

/// Logs the current counters.
pub(crate) fn report(snapshot: &MetricsSnapshot) {
    tracing::info!(
        batches_enqueued = snapshot.batches_enqueued,
        batches_applied = snapshot.batches_applied,
        items_enqueued = snapshot.items_enqueued,
        items_applied = snapshot.items_applied,
        index_levels = snapshot.index_levels,
        leaf_entries = snapshot.leaf_entries,
        "index metrics"
    );
}
