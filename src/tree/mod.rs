//! SB-tree engine: segmented write staging, immutable sorted data
//! blocks, and an asynchronously maintained search index.
//!
//! Writes land in per-thread buffers inside the active segment. The
//! append that fills a buffer raises the seal flag; the first thread to
//! observe it swaps a fresh segment in and converts the old one —
//! collect, sort, slice into blocks, attach to the data layer, enqueue
//! one run for the index worker. Reads resolve a candidate block
//! against the published search snapshot and walk right along the data
//! layer from there.

pub mod block;
pub mod buffer;
pub mod cursor;
pub mod data_layer;
pub mod metrics;
pub mod search;
pub mod segment;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::config::Config;
use crate::error::Result;
use block::DataBlock;
use cursor::RangeCursor;
use data_layer::DataLayer;
use metrics::{IndexMetrics, MetricsSnapshot};
use search::{SearchLayer, Snapshot};
use segment::{SegmentStatus, SegmentedBlock};
use worker::RunQueue;

/// Key type: fixed-width 64-bit unsigned.
pub type Key = u64;

/// Value type: fixed-width 64-bit unsigned.
pub type Value = u64;

/// One key/value pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KvPair {
    pub key: Key,
    pub value: Value,
}

/// Concurrent, in-memory, ordered key/value engine.
///
/// Any number of threads may call [`insert`](Self::insert),
/// [`lookup`](Self::lookup), and [`scan`](Self::scan) concurrently; one
/// dedicated background thread owns all search-index mutation. Under
/// the supported workload each thread's key stream is monotonically
/// non-decreasing and keys are globally unique. With duplicate keys,
/// `lookup` lands on the last block whose minimum key is at most the
/// probe and returns the first matching entry from there on; scans
/// emit every stored occurrence.
pub struct SBTree {
    config: Config,
    active: ArcSwapOption<SegmentedBlock>,
    data: DataLayer,
    snapshot: Arc<ArcSwap<Snapshot>>,
    queue: Arc<RunQueue>,
    metrics: Arc<IndexMetrics>,
    /// Largest key ever inserted. Diagnostic only; the read path never
    /// consults it.
    max_key: AtomicU64,
    worker: Option<thread::JoinHandle<()>>,
}

impl SBTree {
    /// Builds an engine with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Builds an engine with the given configuration, spawning its
    /// index worker thread.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        let snapshot = Arc::new(ArcSwap::from_pointee(Snapshot::empty()));
        let queue = Arc::new(RunQueue::new());
        let metrics = Arc::new(IndexMetrics::default());
        let layer = SearchLayer::new(config.fanout, snapshot.clone());
        let worker = {
            let queue = queue.clone();
            let metrics = metrics.clone();
            thread::Builder::new()
                .name("sbtree-index".into())
                .spawn(move || worker::run_worker(queue, layer, metrics))?
        };
        Ok(Self {
            active: ArcSwapOption::from_pointee(SegmentedBlock::new(&config)),
            config,
            data: DataLayer::new(),
            snapshot,
            queue,
            metrics,
            max_key: AtomicU64::new(0),
            worker: Some(worker),
        })
    }

    /// Stores one pair.
    ///
    /// The pair becomes visible to `lookup`/`scan` once the segment
    /// holding it has been converted, at the latest after a
    /// [`flush`](Self::flush) returns.
    pub fn insert(&self, key: Key, value: Value) {
        self.max_key.fetch_max(key, Ordering::Relaxed);
        loop {
            let guard = self.active.load();
            let Some(seg) = guard.as_ref() else {
                // Taken by a flush: race to install a fresh segment.
                let fresh = Arc::new(SegmentedBlock::new(&self.config));
                let _ = self.active.compare_and_swap(&*guard, Some(fresh));
                continue;
            };
            if seg.append(key, value) {
                if seg.should_seal() {
                    self.rotate_and_convert(&guard, seg);
                }
                return;
            }
            // Sealed, full, or out of slots: rotate and retry. The CAS
            // winner converts the displaced segment; losers just see
            // the fresh one on the next pass.
            self.rotate_and_convert(&guard, seg);
        }
    }

    /// Point lookup. Returns the stored value, or `None` when the key
    /// is absent or still staged in an unconverted segment.
    pub fn lookup(&self, key: Key) -> Option<Value> {
        let mut block = self.candidate(key)?;
        loop {
            if let Some(value) = block.find(key) {
                return Some(value);
            }
            let next = block.next()?;
            if next.min_key() > key {
                return None;
            }
            block = next.clone();
        }
    }

    /// Values for every key in `[lo, hi]`, in ascending key order.
    /// Empty when `lo > hi` or the range misses every stored key.
    pub fn scan(&self, lo: Key, hi: Key) -> Vec<Value> {
        let mut out = Vec::new();
        if lo > hi {
            return out;
        }
        let Some(mut block) = self.candidate(lo) else {
            return out;
        };
        loop {
            if block.min_key() > hi {
                break;
            }
            block.scan_range(lo, hi, &mut out);
            match block.next() {
                Some(next) => block = next.clone(),
                None => break,
            }
        }
        out
    }

    /// Up to `limit` values starting at the first key `>= start`, in
    /// ascending key order.
    pub fn scan_from(&self, start: Key, limit: usize) -> Vec<Value> {
        let mut out = Vec::new();
        let Some(mut block) = self.candidate(start) else {
            return out;
        };
        while out.len() < limit {
            block.scan_from(start, limit - out.len(), &mut out);
            match block.next() {
                Some(next) => block = next.clone(),
                None => break,
            }
        }
        out
    }

    /// Opens a lazy cursor over `[lo, hi]`.
    pub fn range_cursor(&self, lo: Key, hi: Key) -> RangeCursor {
        let start = if lo > hi { None } else { self.candidate(lo) };
        RangeCursor::new(start, lo, hi)
    }

    /// Converts the active segment synchronously. A no-op when the
    /// segment is empty, so repeated flushes are idempotent.
    pub fn flush(&self) {
        if let Some(seg) = self.active.swap(None) {
            seg.seal();
            self.convert_and_append(&seg);
        }
    }

    /// Blocks until every previously enqueued index run has been
    /// applied and published.
    pub fn flush_index(&self) {
        self.queue.wait_idle();
    }

    pub fn index_batches_enqueued(&self) -> u64 {
        self.metrics.batches_enqueued.load(Ordering::Relaxed)
    }

    pub fn index_batches_applied(&self) -> u64 {
        self.metrics.batches_applied.load(Ordering::Relaxed)
    }

    pub fn index_items_enqueued(&self) -> u64 {
        self.metrics.items_enqueued.load(Ordering::Relaxed)
    }

    pub fn index_items_applied(&self) -> u64 {
        self.metrics.items_applied.load(Ordering::Relaxed)
    }

    /// Search index levels in the published snapshot, counting the leaf
    /// level. Never decreases while the engine is alive.
    pub fn index_levels(&self) -> usize {
        self.snapshot.load().level_count()
    }

    /// Largest key ever inserted. Diagnostic only.
    pub fn max_key(&self) -> Key {
        self.max_key.load(Ordering::Relaxed)
    }

    /// Point-in-time view of the diagnostic counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        let snapshot = self.snapshot.load();
        self.metrics
            .snapshot(snapshot.level_count(), snapshot.leaves.len())
    }

    /// Logs the diagnostic counters.
    pub fn log_metrics(&self) {
        metrics::report(&self.metrics());
    }

    /// Candidate block for `key`: the search snapshot's floor entry,
    /// falling back to the data-layer head while the snapshot is empty
    /// or lagging.
    fn candidate(&self, key: Key) -> Option<Arc<DataBlock>> {
        self.snapshot
            .load()
            .find_candidate(key)
            .or_else(|| self.data.head())
    }

    /// Swaps a fresh segment in over `seg` when it is still the active
    /// one. The single CAS winner seals and converts the displaced
    /// segment; losers return with nothing to do.
    fn rotate_and_convert(
        &self,
        observed: &arc_swap::Guard<Option<Arc<SegmentedBlock>>>,
        seg: &Arc<SegmentedBlock>,
    ) {
        let fresh = Arc::new(SegmentedBlock::new(&self.config));
        let prev = self.active.compare_and_swap(&**observed, Some(fresh));
        if same_segment(&prev, observed) {
            seg.seal();
            self.convert_and_append(seg);
        }
    }

    /// Drains a sealed segment into data blocks, attaches them to the
    /// data layer, and enqueues the run for the index worker.
    fn convert_and_append(&self, seg: &SegmentedBlock) {
        let data = seg.collect_and_sort();
        debug_assert_eq!(seg.status(), SegmentStatus::Converted);
        if data.is_empty() {
            return;
        }

        let entries = data.len();
        let mut blocks = Vec::with_capacity(entries.div_ceil(self.config.block_capacity));
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            let (block, consumed) =
                DataBlock::build_from_sorted(rest, self.config.block_capacity, self.config.buckets);
            debug_assert!(consumed > 0);
            blocks.push(Arc::new(block));
            rest = &rest[consumed..];
        }
        for pair in blocks.windows(2) {
            pair[0].set_next(pair[1].clone());
        }

        let first = blocks[0].clone();
        let last = blocks[blocks.len() - 1].clone();
        self.data.append_chain(first, last);

        self.metrics.batches_enqueued.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .items_enqueued
            .fetch_add(blocks.len() as u64, Ordering::Relaxed);
        tracing::debug!(entries, blocks = blocks.len(), "converted segment");
        self.queue.push(blocks);
    }
}

impl Drop for SBTree {
    fn drop(&mut self) {
        self.flush();
        self.queue.wait_idle();
        self.queue.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("index worker panicked");
            }
        }
        tracing::debug!("engine shut down");
    }
}

fn same_segment(a: &Option<Arc<SegmentedBlock>>, b: &Option<Arc<SegmentedBlock>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
