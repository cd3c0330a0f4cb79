//! Append-only, fixed-fanout search index over the data layer.
//!
//! The leaf level holds one entry per data block, in data-layer order.
//! Inner levels are built by batch promotion: whenever a level
//! accumulates a full group of `fanout` ungrouped entries, one parent
//! entry covering exactly that contiguous group is appended to the
//! level above, and the promotion ascends while new parents themselves
//! fill a group. Up to `fanout - 1` trailing entries per level stay
//! ungrouped until later runs complete their group; the engine's
//! right-walk over the data layer covers that suffix, because a
//! candidate is always a correct lower bound on the containing block.
//!
//! The single index worker owns the mutable state. After every applied
//! run it publishes a value copy of the whole index through an atomic
//! shared pointer; readers resolve candidates against that immutable
//! snapshot and never observe mutation.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::block::DataBlock;
use super::Key;

/// Leaf entry: one per data block.
#[derive(Clone)]
pub struct LeafEntry {
    pub min_key: Key,
    pub block: Arc<DataBlock>,
}

/// Inner entry covering exactly `fanout` contiguous entries of the
/// level below.
#[derive(Clone, Copy, Debug)]
pub struct NodeEntry {
    pub min_key: Key,
    pub child_begin: usize,
    pub child_count: usize,
}

/// Immutable read-side view of the index, published as a unit.
pub struct Snapshot {
    pub leaves: Vec<LeafEntry>,
    /// `levels[0]` indexes the leaves, `levels[i]` indexes
    /// `levels[i - 1]`.
    pub levels: Vec<Vec<NodeEntry>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            leaves: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Number of index levels, counting the leaf level.
    pub fn level_count(&self) -> usize {
        self.levels.len() + 1
    }

    /// The block under the greatest leaf `min_key <= key`, or `None`
    /// when `key` precedes the whole index.
    ///
    /// The walk descends through promoted groups only, so the answer
    /// may sit left of the containing block when that block is in an
    /// ungrouped suffix; callers follow `next` links from there.
    pub fn find_candidate(&self, key: Key) -> Option<Arc<DataBlock>> {
        if self.leaves.is_empty() {
            return None;
        }
        if self.levels.is_empty() {
            let pos = floor_index(&self.leaves, 0, self.leaves.len(), key, |e| e.min_key)?;
            return Some(self.leaves[pos].block.clone());
        }

        let top = self.levels.last()?;
        let idx = floor_index(top, 0, top.len(), key, |e| e.min_key)?;
        let mut lo = top[idx].child_begin;
        let mut hi = lo + top[idx].child_count;

        for level in self.levels[..self.levels.len() - 1].iter().rev() {
            let idx = floor_index(level, lo, hi, key, |e| e.min_key)?;
            lo = level[idx].child_begin;
            hi = lo + level[idx].child_count;
        }

        let pos = floor_index(&self.leaves, lo, hi, key, |e| e.min_key)?;
        Some(self.leaves[pos].block.clone())
    }
}

/// Greatest index in `[lo, hi)` whose min key is `<= key`.
fn floor_index<T>(
    entries: &[T],
    lo: usize,
    hi: usize,
    key: Key,
    min_key: impl Fn(&T) -> Key,
) -> Option<usize> {
    let n = entries[lo..hi].partition_point(|e| min_key(e) <= key);
    (n > 0).then(|| lo + n - 1)
}

/// Writer side of the index, owned by the index worker.
pub struct SearchLayer {
    leaves: Vec<LeafEntry>,
    levels: Vec<Vec<NodeEntry>>,
    /// Per level, how many entries have been grouped into a parent.
    /// `promoted[0]` tracks the leaves, `promoted[i]` tracks
    /// `levels[i - 1]`.
    promoted: Vec<usize>,
    fanout: usize,
    snapshot: Arc<ArcSwap<Snapshot>>,
}

impl SearchLayer {
    pub fn new(fanout: usize, snapshot: Arc<ArcSwap<Snapshot>>) -> Self {
        debug_assert!(fanout >= 2);
        Self {
            leaves: Vec::new(),
            levels: Vec::new(),
            promoted: vec![0],
            fanout,
            snapshot,
        }
    }

    /// Applies one conversion's run: appends a leaf entry per block,
    /// promotes bottom-up, and publishes a fresh snapshot.
    ///
    /// `blocks` must be sorted by min key and must not precede the
    /// current last leaf.
    pub fn append_run(&mut self, blocks: Vec<Arc<DataBlock>>) {
        if blocks.is_empty() {
            return;
        }
        debug_assert!(
            blocks.windows(2).all(|w| w[0].min_key() <= w[1].min_key()),
            "run not sorted by min key"
        );
        debug_assert!(
            self.leaves
                .last()
                .map_or(true, |last| last.min_key <= blocks[0].min_key()),
            "run precedes the existing leaf level"
        );

        self.leaves.reserve(blocks.len());
        for block in blocks {
            self.leaves.push(LeafEntry {
                min_key: block.min_key(),
                block,
            });
        }
        self.promote_from(0);
        self.check_invariants();
        self.publish();
    }

    /// Resets the index to empty and publishes the empty snapshot.
    pub fn clear(&mut self) {
        self.leaves.clear();
        self.levels.clear();
        self.promoted.clear();
        self.promoted.push(0);
        self.publish();
    }

    pub fn leaf_size(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of index levels, counting the leaf level.
    pub fn level_count(&self) -> usize {
        self.levels.len() + 1
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Groups every full run of `fanout` ungrouped entries into a
    /// parent entry, ascending while new parents fill a group of their
    /// own. Trailing partial groups wait for later runs.
    fn promote_from(&mut self, start: usize) {
        let fanout = self.fanout;
        let mut level = start;
        loop {
            if self.promoted.len() <= level {
                self.promoted.resize(level + 1, 0);
            }
            let p = self.promoted[level];
            if self.level_size(level) >= p + fanout {
                if self.levels.len() <= level {
                    self.levels.resize(level + 1, Vec::new());
                }
                if self.promoted.len() <= level + 1 {
                    self.promoted.resize(level + 2, 0);
                }
                let entry = NodeEntry {
                    min_key: self.level_min_key(level, p),
                    child_begin: p,
                    child_count: fanout,
                };
                self.levels[level].push(entry);
                self.promoted[level] = p + fanout;
                continue;
            }
            // Nothing left to group here; ascend when the parent level
            // has accumulated a full group of its own.
            if self.levels.len() <= level {
                break;
            }
            let parent_size = self.levels[level].len();
            let parent_promoted = self.promoted.get(level + 1).copied().unwrap_or(0);
            if parent_size >= parent_promoted + fanout {
                level += 1;
                continue;
            }
            break;
        }
    }

    fn level_size(&self, level: usize) -> usize {
        if level == 0 {
            self.leaves.len()
        } else {
            self.levels[level - 1].len()
        }
    }

    fn level_min_key(&self, level: usize, index: usize) -> Key {
        if level == 0 {
            self.leaves[index].min_key
        } else {
            self.levels[level - 1][index].min_key
        }
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(Snapshot {
            leaves: self.leaves.clone(),
            levels: self.levels.clone(),
        }));
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.leaves.windows(2).all(|w| w[0].min_key <= w[1].min_key),
            "leaf level not non-decreasing"
        );
        for (level, promoted) in self.promoted.iter().enumerate() {
            debug_assert!(
                *promoted <= self.level_size(level),
                "promotion cursor past level {level}"
            );
        }
        for (level, parent) in self.levels.iter().enumerate() {
            let child_size = self.level_size(level);
            debug_assert!(
                parent.windows(2).all(|w| w[0].min_key <= w[1].min_key),
                "level {level} parents not non-decreasing"
            );
            for entry in parent {
                debug_assert!(entry.child_count == self.fanout);
                debug_assert!(entry.child_begin + entry.child_count <= child_size);
                debug_assert!(entry.min_key == self.level_min_key(level, entry.child_begin));
            }
        }
    }
}
