use std::mem::size_of;

use crate::errconfig;
use crate::error::Result;
use crate::tree::{Key, KvPair, Value};

/// Byte budget for one per-thread write buffer.
const BUFFER_BYTES: usize = 16 * 1024;

/// Byte budget for one data block.
const BLOCK_BYTES: usize = 4096;

/// Data block header: status byte, min key, next pointer, lock word,
/// entry count.
const BLOCK_HEADER_BYTES: usize = 1 + size_of::<Key>() + size_of::<usize>() + 4 + 4;

/// Default number of N-ary partitions inside a data block.
pub const DEFAULT_BUCKETS: usize = 8;

/// Default slot-table size of a segmented block.
pub const DEFAULT_MAX_BUFFERS: usize = 128;

/// Default search-layer fanout.
pub const DEFAULT_FANOUT: usize = 64;

/// Entries one per-thread buffer holds under the 16 KiB budget, after
/// the entry-count and max-key metadata prefix.
pub const DEFAULT_BUFFER_CAPACITY: usize =
    (BUFFER_BYTES - size_of::<usize>() - size_of::<Key>()) / size_of::<KvPair>();

/// Entries one data block holds under the 4 KiB budget, after the
/// header and an N-ary table of `buckets` keys.
pub const fn block_capacity_for(buckets: usize) -> usize {
    (BLOCK_BYTES - BLOCK_HEADER_BYTES - buckets * size_of::<Key>())
        / (size_of::<Key>() + size_of::<Value>())
}

/// Configuration for an SBTree engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity in entries of each per-thread write buffer.
    pub buffer_capacity: usize,

    /// Capacity in entries of each data block.
    pub block_capacity: usize,

    /// Number of N-ary partitions inside a data block.
    pub buckets: usize,

    /// Slot-table size of a segmented block, bounding the number of
    /// concurrent writer threads per segment.
    pub max_buffers: usize,

    /// Search-layer fanout: every inner entry covers exactly this many
    /// children. Must be at least 2.
    pub fanout: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            block_capacity: block_capacity_for(DEFAULT_BUCKETS),
            buckets: DEFAULT_BUCKETS,
            max_buffers: DEFAULT_MAX_BUFFERS,
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-thread buffer capacity in entries.
    pub fn buffer_capacity(mut self, entries: usize) -> Self {
        self.buffer_capacity = entries;
        self
    }

    /// Set the data block capacity in entries.
    pub fn block_capacity(mut self, entries: usize) -> Self {
        self.block_capacity = entries;
        self
    }

    /// Set the number of N-ary partitions per data block.
    ///
    /// The default block capacity assumes [`DEFAULT_BUCKETS`]; use
    /// [`block_capacity_for`] to re-derive it for another bucket count.
    pub fn buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    /// Set the segment slot-table size.
    pub fn max_buffers(mut self, slots: usize) -> Self {
        self.max_buffers = slots;
        self
    }

    /// Set the search-layer fanout.
    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.fanout < 2 {
            return errconfig!("fanout must be at least 2, got {}", self.fanout);
        }
        if self.buffer_capacity == 0 {
            return errconfig!("buffer capacity must be non-zero");
        }
        if self.block_capacity == 0 {
            return errconfig!("block capacity must be non-zero");
        }
        if self.buckets == 0 {
            return errconfig!("bucket count must be non-zero");
        }
        if self.max_buffers == 0 {
            return errconfig!("segment slot table must hold at least one buffer");
        }
        Ok(())
    }
}
