//! Hand-off between converters and the single index worker.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::block::DataBlock;
use super::metrics::IndexMetrics;
use super::search::SearchLayer;

/// One conversion's worth of blocks, applied to the index as a unit.
pub type Run = Vec<Arc<DataBlock>>;

#[derive(Default)]
struct QueueState {
    runs: VecDeque<Run>,
    in_flight: usize,
    stop: bool,
}

/// FIFO run queue: many producers, one consumer, blocking waits.
pub struct RunQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, run: Run) {
        let mut state = self.state.lock();
        state.runs.push_back(run);
        self.cond.notify_all();
    }

    /// Blocks until every enqueued run has been applied.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.runs.is_empty() || state.in_flight > 0 {
            self.cond.wait(&mut state);
        }
    }

    /// Wakes the worker for a final drain and exit.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.stop = true;
        self.cond.notify_all();
    }

    /// Blocks for the next run; `None` once stopped and drained.
    fn pop(&self) -> Option<Run> {
        let mut state = self.state.lock();
        loop {
            if let Some(run) = state.runs.pop_front() {
                state.in_flight += 1;
                return Some(run);
            }
            if state.stop {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        self.cond.notify_all();
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the dedicated index worker thread: apply runs in arrival
/// order until shutdown drains the queue.
pub fn run_worker(queue: Arc<RunQueue>, mut layer: SearchLayer, metrics: Arc<IndexMetrics>) {
    while let Some(run) = queue.pop() {
        let items = run.len() as u64;
        layer.append_run(run);
        metrics.batches_applied.fetch_add(1, Ordering::Relaxed);
        metrics.items_applied.fetch_add(items, Ordering::Relaxed);
        tracing::trace!(
            blocks = items,
            leaves = layer.leaf_size(),
            levels = layer.level_count(),
            "applied index run"
        );
        queue.finish();
    }
    tracing::debug!("index worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::search::Snapshot;
    use crate::tree::KvPair;
    use arc_swap::ArcSwap;
    use std::thread;

    fn single_block(key: u64) -> Arc<DataBlock> {
        let pair = [KvPair {
            key,
            value: key * 10,
        }];
        Arc::new(DataBlock::build_from_sorted(&pair, 8, 4).0)
    }

    fn spawn_worker(
        queue: Arc<RunQueue>,
        metrics: Arc<IndexMetrics>,
    ) -> (thread::JoinHandle<()>, Arc<ArcSwap<Snapshot>>) {
        let cell = Arc::new(ArcSwap::from_pointee(Snapshot::empty()));
        let layer = SearchLayer::new(4, cell.clone());
        let handle = thread::spawn(move || run_worker(queue, layer, metrics));
        (handle, cell)
    }

    #[test]
    fn test_runs_apply_in_order() {
        let queue = Arc::new(RunQueue::new());
        let metrics = Arc::new(IndexMetrics::default());
        let (handle, cell) = spawn_worker(queue.clone(), metrics.clone());

        queue.push(vec![single_block(100), single_block(200)]);
        queue.push(vec![single_block(300)]);
        queue.wait_idle();

        assert_eq!(metrics.batches_applied.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.items_applied.load(Ordering::Relaxed), 3);
        assert_eq!(cell.load().leaves.len(), 3);

        queue.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_shutdown_drains_pending_runs() {
        let queue = Arc::new(RunQueue::new());
        let metrics = Arc::new(IndexMetrics::default());

        queue.push(vec![single_block(100)]);
        queue.shutdown();

        let (handle, cell) = spawn_worker(queue.clone(), metrics.clone());
        handle.join().unwrap();

        assert_eq!(metrics.batches_applied.load(Ordering::Relaxed), 1);
        assert_eq!(cell.load().leaves.len(), 1);
    }

    #[test]
    fn test_wait_idle_on_empty_queue_returns() {
        let queue = RunQueue::new();
        queue.wait_idle();
    }
}
