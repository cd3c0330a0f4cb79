//! Write-side segment coordinating per-thread buffers.
//!
//! A segment routes each writer thread to its own append buffer through
//! a thread-local slot cache, so steady-state appends touch no shared
//! slot state. The buffer that fills raises the seal flag; the engine
//! reacts by rotating in a fresh segment and converting this one into a
//! sorted run.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::buffer::PerThreadBuffer;
use super::{Key, KvPair, Value};
use crate::config::Config;

/// Lifecycle stage of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentStatus {
    /// Accepting writes.
    Active,
    /// Sealed; being collected into a sorted run.
    Convert,
    /// Drained; eligible for teardown.
    Converted,
}

const STATUS_ACTIVE: u8 = 0;
const STATUS_CONVERT: u8 = 1;
const STATUS_CONVERTED: u8 = 2;

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Which slot of which segment this thread writes to. Segment ids
    /// are globally unique, so a stale entry can never alias a slot
    /// another thread allocated after rotation.
    static CACHED_SLOT: Cell<Option<(u64, usize)>> = Cell::new(None);
}

pub struct SegmentedBlock {
    id: u64,
    status: AtomicU8,
    min_key: AtomicU64,
    should_seal: AtomicBool,
    /// Slots allocated to writer threads.
    reserved: AtomicUsize,
    /// Entries committed across all buffers.
    committed: AtomicUsize,
    alloc_lock: Mutex<()>,
    slots: Box<[OnceLock<Mutex<PerThreadBuffer>>]>,
    buffer_capacity: usize,
}

impl SegmentedBlock {
    pub fn new(config: &Config) -> Self {
        Self {
            id: NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed),
            status: AtomicU8::new(STATUS_ACTIVE),
            min_key: AtomicU64::new(Key::MAX),
            should_seal: AtomicBool::new(false),
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            alloc_lock: Mutex::new(()),
            slots: (0..config.max_buffers).map(|_| OnceLock::new()).collect(),
            buffer_capacity: config.buffer_capacity,
        }
    }

    /// Appends one pair to the calling thread's buffer.
    ///
    /// Returns false when the segment is sealed, the slot table is
    /// exhausted, or the thread's buffer is full. None of these are
    /// errors: the engine reacts by rotating segments and retrying.
    pub fn append(&self, key: Key, value: Value) -> bool {
        if self.status.load(Ordering::Acquire) != STATUS_ACTIVE {
            return false;
        }
        let slot = match self.resolve_slot() {
            Some(slot) => slot,
            None => return false,
        };
        let Some(buffer) = self.slots[slot].get() else {
            return false;
        };
        let mut buffer = buffer.lock();
        // Re-checked under the slot lock: a write racing the seal is
        // either drained by the conversion or rejected here, never
        // silently dropped.
        if self.status.load(Ordering::Acquire) != STATUS_ACTIVE {
            return false;
        }
        if buffer.is_full() {
            return false;
        }
        if !buffer.insert(key, value) {
            return false;
        }
        self.min_key.fetch_min(key, Ordering::AcqRel);
        self.committed.fetch_add(1, Ordering::Relaxed);
        if buffer.is_full() {
            self.should_seal.store(true, Ordering::Release);
        }
        true
    }

    /// Once raised by the append that filled a buffer, stays raised.
    pub fn should_seal(&self) -> bool {
        self.should_seal.load(Ordering::Acquire)
    }

    /// Flips ACTIVE to CONVERT. Idempotent; racing callers are no-ops.
    pub fn seal(&self) {
        let _ = self.status.compare_exchange(
            STATUS_ACTIVE,
            STATUS_CONVERT,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn status(&self) -> SegmentStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_ACTIVE => SegmentStatus::Active,
            STATUS_CONVERT => SegmentStatus::Convert,
            _ => SegmentStatus::Converted,
        }
    }

    /// Smallest key accepted so far, or `Key::MAX` while empty.
    pub fn min_key(&self) -> Key {
        self.min_key.load(Ordering::Acquire)
    }

    /// Slots handed out to writer threads.
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    /// Entries committed across all buffers.
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    /// Drains every allocated buffer into one globally sorted run,
    /// sealing first when the caller has not already done so.
    ///
    /// Each buffer is non-decreasing on its own, but interleaving
    /// across buffers is arbitrary; the stable sort is what
    /// re-establishes global order.
    pub fn collect_and_sort(&self) -> Vec<KvPair> {
        let _guard = self.alloc_lock.lock();
        self.seal();
        let total: usize = self
            .slots
            .iter()
            .filter_map(|slot| slot.get())
            .map(|buffer| buffer.lock().len())
            .sum();
        let mut data = Vec::with_capacity(total);
        for slot in self.slots.iter() {
            if let Some(buffer) = slot.get() {
                data.extend_from_slice(buffer.lock().entries());
            }
        }
        data.sort_by_key(|kv| kv.key);
        self.status.store(STATUS_CONVERTED, Ordering::Release);
        data
    }

    /// Resolves the calling thread's slot, allocating one on first use
    /// within this segment. `None` means the table is exhausted.
    fn resolve_slot(&self) -> Option<usize> {
        if let Some((id, slot)) = CACHED_SLOT.with(Cell::get) {
            if id == self.id && self.slots[slot].get().is_some() {
                return Some(slot);
            }
        }
        let slot = self.allocate_slot()?;
        CACHED_SLOT.with(|cache| cache.set(Some((self.id, slot))));
        Some(slot)
    }

    fn allocate_slot(&self) -> Option<usize> {
        let _guard = self.alloc_lock.lock();
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.get().is_none() {
                let installed = slot.set(Mutex::new(PerThreadBuffer::new(self.buffer_capacity)));
                debug_assert!(installed.is_ok());
                self.reserved.fetch_add(1, Ordering::Relaxed);
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn segment(buffer_capacity: usize, max_buffers: usize) -> SegmentedBlock {
        SegmentedBlock::new(
            &Config::new()
                .buffer_capacity(buffer_capacity)
                .max_buffers(max_buffers),
        )
    }

    #[test]
    fn test_append_and_collect_sorted() {
        let seg = segment(16, 4);
        for k in [4u64, 7, 9, 12] {
            assert!(seg.append(k, k * 10));
        }
        assert_eq!(seg.min_key(), 4);
        assert_eq!(seg.committed(), 4);

        let data = seg.collect_and_sort();
        let keys: Vec<u64> = data.iter().map(|kv| kv.key).collect();
        assert_eq!(keys, vec![4, 7, 9, 12]);
        assert_eq!(seg.status(), SegmentStatus::Converted);
    }

    #[test]
    fn test_seal_rejects_appends() {
        let seg = segment(16, 4);
        assert!(seg.append(1, 10));
        seg.seal();
        assert_eq!(seg.status(), SegmentStatus::Convert);
        assert!(!seg.append(2, 20));
        // Sealing again is a no-op.
        seg.seal();
        assert_eq!(seg.status(), SegmentStatus::Convert);
    }

    #[test]
    fn test_should_seal_raised_on_fill() {
        let seg = segment(3, 4);
        assert!(seg.append(1, 10));
        assert!(seg.append(2, 20));
        assert!(!seg.should_seal());
        assert!(seg.append(3, 30));
        assert!(seg.should_seal());
        // The full buffer rejects further appends from its owner.
        assert!(!seg.append(4, 40));
    }

    #[test]
    fn test_concurrent_writers_get_distinct_slots() {
        let seg = segment(64, 8);
        thread::scope(|scope| {
            for t in 0u64..4 {
                let seg = &seg;
                scope.spawn(move || {
                    for i in 0..16 {
                        assert!(seg.append(t * 100 + i, i));
                    }
                });
            }
        });
        assert_eq!(seg.reserved(), 4);
        assert_eq!(seg.committed(), 64);

        let data = seg.collect_and_sort();
        assert_eq!(data.len(), 64);
        assert!(data.windows(2).all(|w| w[0].key <= w[1].key));
    }

    #[test]
    fn test_slot_table_exhaustion() {
        let seg = segment(16, 1);
        assert!(seg.append(1, 10));
        thread::scope(|scope| {
            let seg = &seg;
            scope.spawn(move || {
                // Only slot is taken by the outer thread.
                assert!(!seg.append(2, 20));
            });
        });
        assert_eq!(seg.reserved(), 1);
    }

    #[test]
    fn test_slot_cache_revalidates_across_segments() {
        let first = segment(16, 4);
        assert!(first.append(1, 10));
        // Same thread, fresh segment: the cached slot belongs to the
        // old segment id and must be reallocated.
        let second = segment(16, 4);
        assert!(second.append(2, 20));
        assert_eq!(second.reserved(), 1);
        assert_eq!(second.collect_and_sort().len(), 1);
    }

    #[test]
    fn test_collect_seals_unsealed_segment() {
        let seg = segment(16, 4);
        assert!(seg.append(5, 50));
        let data = seg.collect_and_sort();
        assert_eq!(data.len(), 1);
        assert_eq!(seg.status(), SegmentStatus::Converted);
        assert!(!seg.append(6, 60));
    }

    #[test]
    fn test_empty_segment_collects_empty() {
        let seg = segment(16, 4);
        assert!(seg.collect_and_sort().is_empty());
        assert_eq!(seg.min_key(), Key::MAX);
    }
}
