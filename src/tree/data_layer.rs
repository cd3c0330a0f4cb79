use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::block::DataBlock;

/// Singly linked list of data blocks ordered by minimum key.
///
/// Converters pre-link each run outside the lock; the mutex only covers
/// the tail hand-off. Readers never take it: they load `head` and chase
/// the immutable `next` links, which is safe because blocks are never
/// unlinked or freed while the engine is alive.
pub struct DataLayer {
    head: ArcSwapOption<DataBlock>,
    tail: Mutex<Option<Arc<DataBlock>>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self {
            head: ArcSwapOption::const_empty(),
            tail: Mutex::new(None),
        }
    }

    /// Attaches a pre-linked chain; `first` must already reach `last`
    /// through `next` links.
    pub fn append_chain(&self, first: Arc<DataBlock>, last: Arc<DataBlock>) {
        let mut tail = self.tail.lock();
        match tail.as_ref() {
            Some(prev) => {
                debug_assert!(
                    prev.entry_at(prev.size() - 1).key <= first.min_key(),
                    "appended chain precedes the current tail"
                );
                prev.set_next(first);
            }
            None => self.head.store(Some(first)),
        }
        *tail = Some(last);
    }

    pub fn head(&self) -> Option<Arc<DataBlock>> {
        self.head.load_full()
    }
}

impl Default for DataLayer {
    fn default() -> Self {
        Self::new()
    }
}
