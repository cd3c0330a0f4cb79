//! Model-based property tests: the engine against a `BTreeMap`, and
//! the search layer against a linear floor scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;

use crate::tree::block::DataBlock;
use crate::tree::search::{SearchLayer, Snapshot};
use crate::tree::KvPair;
use crate::{Config, SBTree};

fn small_tree() -> SBTree {
    SBTree::with_config(
        Config::new()
            .buffer_capacity(32)
            .block_capacity(8)
            .buckets(4)
            .fanout(4),
    )
    .unwrap()
}

fn single_block(key: u64) -> Arc<DataBlock> {
    let pair = [KvPair {
        key,
        value: key * 10,
    }];
    Arc::new(DataBlock::build_from_sorted(&pair, 8, 4).0)
}

proptest! {
    /// After arbitrary flush boundaries, every inserted key is found
    /// with its value and absent keys miss, exactly like the model.
    #[test]
    fn lookup_matches_model(
        keys in btree_set(0u64..1_000_000, 1..300),
        chunk in 1usize..48,
    ) {
        let tree = small_tree();
        let mut model = BTreeMap::new();
        let keys: Vec<u64> = keys.into_iter().collect();
        for batch in keys.chunks(chunk) {
            for &k in batch {
                tree.insert(k, k.wrapping_mul(7));
                model.insert(k, k.wrapping_mul(7));
            }
            tree.flush();
        }
        tree.flush_index();

        for &k in &keys {
            prop_assert_eq!(tree.lookup(k), model.get(&k).copied());
        }
        prop_assert_eq!(tree.lookup(1_000_001), None);
        for probe in [0u64, 499_999, 999_999] {
            prop_assert_eq!(tree.lookup(probe), model.get(&probe).copied());
        }
    }

    /// Scans return exactly the model's value range, ascending, and an
    /// inverted range is empty.
    #[test]
    fn scan_matches_model(
        keys in btree_set(0u64..10_000, 1..300),
        chunk in 1usize..48,
        a in 0u64..11_000,
        b in 0u64..11_000,
    ) {
        let tree = small_tree();
        let mut model = BTreeMap::new();
        let keys: Vec<u64> = keys.into_iter().collect();
        for batch in keys.chunks(chunk) {
            for &k in batch {
                tree.insert(k, k + 1);
                model.insert(k, k + 1);
            }
            tree.flush();
        }
        tree.flush_index();

        let (lo, hi) = (a.min(b), a.max(b));
        let expected: Vec<u64> = model.range(lo..=hi).map(|(_, &v)| v).collect();
        prop_assert_eq!(tree.scan(lo, hi), expected);
        if lo < hi {
            prop_assert_eq!(tree.scan(hi, lo), Vec::<u64>::new());
        }
    }

    /// Prefix scans take the first `limit` in-range values of the model.
    #[test]
    fn scan_from_matches_model(
        keys in btree_set(0u64..10_000, 1..200),
        start in 0u64..11_000,
        limit in 0usize..64,
    ) {
        let tree = small_tree();
        let mut model = BTreeMap::new();
        for &k in &keys {
            tree.insert(k, k + 1);
            model.insert(k, k + 1);
        }
        tree.flush();
        tree.flush_index();

        let expected: Vec<u64> = model.range(start..).take(limit).map(|(_, &v)| v).collect();
        prop_assert_eq!(tree.scan_from(start, limit), expected);
    }

    /// A block behaves like a slice for find and range scans, for any
    /// bucket count.
    #[test]
    fn block_matches_slice(
        keys in btree_set(0u64..5_000, 1..64),
        buckets in 1usize..12,
        probe in 0u64..5_100,
        a in 0u64..5_100,
        b in 0u64..5_100,
    ) {
        let pairs: Vec<KvPair> = keys
            .iter()
            .map(|&k| KvPair { key: k, value: k * 3 })
            .collect();
        let (block, consumed) = DataBlock::build_from_sorted(&pairs, pairs.len(), buckets);
        prop_assert_eq!(consumed, pairs.len());

        let expected = pairs.iter().find(|kv| kv.key == probe).map(|kv| kv.value);
        prop_assert_eq!(block.find(probe), expected);

        let (lo, hi) = (a.min(b), a.max(b));
        let mut out = Vec::new();
        block.scan_range(lo, hi, &mut out);
        let expected: Vec<u64> = pairs
            .iter()
            .filter(|kv| kv.key >= lo && kv.key <= hi)
            .map(|kv| kv.value)
            .collect();
        prop_assert_eq!(out, expected);
    }

    /// Candidates are the floor leaf over any run shape, and the level
    /// count never decreases as runs are applied.
    #[test]
    fn candidate_is_floor_leaf(
        fanout in 2usize..9,
        runs in vec(1usize..6, 1..40),
    ) {
        let cell = Arc::new(ArcSwap::from_pointee(Snapshot::empty()));
        let mut layer = SearchLayer::new(fanout, cell.clone());

        let mut leaf_keys: Vec<u64> = Vec::new();
        let mut next_key = 0u64;
        let mut last_levels = 1;
        for run_len in runs {
            let mut run = Vec::with_capacity(run_len);
            for _ in 0..run_len {
                next_key += 10;
                leaf_keys.push(next_key);
                run.push(single_block(next_key));
            }
            layer.append_run(run);
            prop_assert!(layer.level_count() >= last_levels);
            last_levels = layer.level_count();
        }

        let snapshot = cell.load();
        for probe in (0..=next_key + 10).step_by(5) {
            let expected = leaf_keys.iter().rev().find(|&&k| k <= probe).copied();
            let got = snapshot.find_candidate(probe).map(|b| b.min_key());
            prop_assert_eq!(got, expected);
        }
    }
}
