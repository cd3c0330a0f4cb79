//! Immutable sorted leaf blocks of the data layer.
//!
//! A block is built once from a prefix of a globally sorted run and is
//! never mutated afterwards, so readers traverse it without locks. A
//! small N-ary table records the first key of each equal-width bucket
//! over the sorted keys; point lookups use it to narrow the probe to a
//! short range before scanning linearly.

use std::sync::{Arc, OnceLock};

use super::{Key, KvPair, Value};

pub struct DataBlock {
    min_key: Key,
    keys: Box<[Key]>,
    vals: Box<[Value]>,
    nary: Box<[Key]>,
    next: OnceLock<Arc<DataBlock>>,
}

impl DataBlock {
    /// Builds a block from the front of `src`, consuming up to
    /// `capacity` entries. Returns the block and the consumed count so
    /// the caller can slice the remainder into further blocks.
    pub fn build_from_sorted(src: &[KvPair], capacity: usize, buckets: usize) -> (Self, usize) {
        debug_assert!(!src.is_empty(), "a data block consumes a non-empty prefix");
        let take = src.len().min(capacity);
        let keys: Box<[Key]> = src[..take].iter().map(|kv| kv.key).collect();
        let vals: Box<[Value]> = src[..take].iter().map(|kv| kv.value).collect();
        let nary = build_nary(&keys, buckets);
        let block = Self {
            min_key: keys[0],
            keys,
            vals,
            nary,
            next: OnceLock::new(),
        };
        (block, take)
    }

    /// Point lookup: bucket first, then a short linear probe that bails
    /// on overshoot.
    pub fn find(&self, key: Key) -> Option<Value> {
        if self.keys.is_empty() || key < self.min_key {
            return None;
        }
        let (lo, hi) = self.bucket_range(key);
        for i in lo..hi {
            if self.keys[i] == key {
                return Some(self.vals[i]);
            }
            if self.keys[i] > key {
                break;
            }
        }
        None
    }

    /// Appends to `out` up to `limit` values starting at the first key
    /// `>= start`; returns how many were taken from this block.
    pub fn scan_from(&self, start: Key, limit: usize, out: &mut Vec<Value>) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        let (lo, hi) = self.bucket_range(start);
        let mut pos = lo;
        while pos < hi && self.keys[pos] < start {
            pos += 1;
        }
        let mut taken = 0;
        while pos < self.keys.len() && taken < limit {
            out.push(self.vals[pos]);
            pos += 1;
            taken += 1;
        }
        taken
    }

    /// Appends to `out` every value with `lo <= key <= hi`; returns how
    /// many were taken from this block.
    pub fn scan_range(&self, lo: Key, hi: Key, out: &mut Vec<Value>) -> usize {
        if lo > hi {
            return 0;
        }
        let mut taken = 0;
        for i in self.lower_bound(lo)..self.keys.len() {
            if self.keys[i] > hi {
                break;
            }
            out.push(self.vals[i]);
            taken += 1;
        }
        taken
    }

    /// First index whose key is `>= key`, or `size()` when none is.
    pub fn lower_bound(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    pub fn entry_at(&self, index: usize) -> KvPair {
        KvPair {
            key: self.keys[index],
            value: self.vals[index],
        }
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn min_key(&self) -> Key {
        self.min_key
    }

    pub fn next(&self) -> Option<&Arc<DataBlock>> {
        self.next.get()
    }

    /// Links the successor block. Wired exactly once per block, by the
    /// converter holding the data-layer tail.
    pub(crate) fn set_next(&self, next: Arc<DataBlock>) {
        let linked = self.next.set(next);
        debug_assert!(linked.is_ok(), "data block already linked");
    }

    /// `[lo, hi)` index range of the bucket that may contain `key`.
    fn bucket_range(&self, key: Key) -> (usize, usize) {
        let count = self.keys.len();
        let buckets = count.min(self.nary.len());
        let per = count.div_ceil(buckets);
        let upper = self.nary.iter().take_while(|&&b| b <= key).count();
        if upper == 0 {
            (0, per.min(count))
        } else {
            ((upper - 1) * per, (upper * per).min(count))
        }
    }
}

/// First key of each of `min(len, buckets)` ceil-width buckets, padded
/// to `buckets` entries with the max-key sentinel.
fn build_nary(keys: &[Key], buckets: usize) -> Box<[Key]> {
    let mut nary = vec![Key::MAX; buckets].into_boxed_slice();
    if keys.is_empty() {
        return nary;
    }
    let used = keys.len().min(buckets);
    let per = keys.len().div_ceil(used);
    for (i, slot) in nary.iter_mut().enumerate().take(used) {
        let idx = i * per;
        if idx < keys.len() {
            *slot = keys[idx];
        }
    }
    nary
}
