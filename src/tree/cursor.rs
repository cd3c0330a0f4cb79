use std::sync::Arc;

use super::block::DataBlock;
use super::{Key, KvPair, Value};

/// Lazy cursor over the pairs with keys in `[lo, hi]`, ascending.
///
/// The cursor holds shared ownership of the block it sits on, so it
/// stays usable for as long as the caller keeps it, and it observes
/// blocks appended after creation through the live `next` links.
pub struct RangeCursor {
    block: Option<Arc<DataBlock>>,
    pos: usize,
    lo: Key,
    hi: Key,
}

impl RangeCursor {
    pub(crate) fn new(start: Option<Arc<DataBlock>>, lo: Key, hi: Key) -> Self {
        let mut cursor = Self {
            block: if lo > hi { None } else { start },
            pos: 0,
            lo,
            hi,
        };
        if let Some(block) = cursor.block.as_ref() {
            cursor.pos = block.lower_bound(lo);
        }
        cursor
    }

    /// Next pair in range, or `None` once the range is exhausted.
    pub fn next(&mut self) -> Option<(Key, Value)> {
        loop {
            let block = self.block.as_ref()?;
            if self.pos >= block.size() {
                // A candidate can start left of the range, so re-seek
                // the lower bound in each block we advance into.
                let next = block.next().cloned();
                self.pos = next.as_ref().map_or(0, |b| b.lower_bound(self.lo));
                self.block = next;
                continue;
            }
            let entry = block.entry_at(self.pos);
            if entry.key > self.hi {
                self.block = None;
                return None;
            }
            self.pos += 1;
            return Some((entry.key, entry.value));
        }
    }

    /// Up to `limit` pairs in one call.
    pub fn next_batch(&mut self, limit: usize) -> Vec<KvPair> {
        let mut out = Vec::with_capacity(limit.min(64));
        while out.len() < limit {
            match self.next() {
                Some((key, value)) => out.push(KvPair { key, value }),
                None => break,
            }
        }
        out
    }
}

impl Iterator for RangeCursor {
    type Item = (Key, Value);

    fn next(&mut self) -> Option<Self::Item> {
        RangeCursor::next(self)
    }
}
