//! Tests for Level
//!
//! These tests verify:
//! - Tier 1 lookups return the newest block's record
//! - Sorted tiers find the single candidate block
//! - merge_blocks keeps the newest record per key
//! - Sorted tier output stays disjoint and ordered
//! - Untouched blocks are carried over as they are
//! - Tombstones are dropped only when asked to

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tierkv::cache::BlockCache;
use tierkv::level::{Level, MergeOptions};
use tierkv::memtable::Entry;
use tierkv::storage::{Block, BlockFactory, BlockId, Records};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, BlockFactory) {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(BlockCache::new(16));
    let factory = BlockFactory::new(dir.path(), cache, 1);
    (dir, factory)
}

fn block(factory: &BlockFactory, pairs: &[(&str, Option<&str>)]) -> Arc<Block> {
    let records: Records = pairs
        .iter()
        .map(|(k, v)| {
            let entry = match v {
                Some(v) => Entry::Value(v.to_string()),
                None => Entry::Tombstone,
            };
            (k.to_string(), entry)
        })
        .collect();
    factory.create(&records).unwrap()
}

fn options(limit: usize, drop_tombstones: bool) -> MergeOptions {
    MergeOptions {
        block_entry_limit: limit,
        drop_tombstones,
    }
}

fn value(v: &str) -> Option<Entry> {
    Some(Entry::Value(v.to_string()))
}

/// Every record of the level in block order
fn dump(level: &Level) -> Vec<(String, Entry)> {
    level
        .blocks()
        .iter()
        .flat_map(|b| {
            b.contents()
                .unwrap()
                .iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn assert_disjoint(level: &Level) {
    for pair in level.blocks().windows(2) {
        assert!(
            pair[0].high() < pair[1].low(),
            "{:?} overlaps {:?}",
            pair[0],
            pair[1]
        );
    }
}

// =============================================================================
// Tier 1 Tests
// =============================================================================

#[test]
fn test_tier1_newest_block_wins() {
    let (_dir, factory) = setup();
    let old = block(&factory, &[("a", Some("old")), ("b", Some("old"))]);
    let new = block(&factory, &[("b", Some("new")), ("c", None)]);

    let level = Level::with_blocks(1, vec![new, old]).unwrap();

    assert_eq!(level.get("a").unwrap(), value("old"));
    assert_eq!(level.get("b").unwrap(), value("new"));
    assert_eq!(level.get("c").unwrap(), Some(Entry::Tombstone));
    assert_eq!(level.get("d").unwrap(), None);
}

#[test]
fn test_tier1_merge_prepends_incoming() {
    let (_dir, factory) = setup();
    let old = block(&factory, &[("k", Some("1"))]);
    let new = block(&factory, &[("k", Some("2"))]);
    let mut level = Level::with_blocks(1, vec![old]).unwrap();

    let merge = level
        .merge_blocks(&[Arc::clone(&new)], &factory, options(100, false))
        .unwrap();
    assert!(merge.removed.is_empty());
    level.install(&merge);

    assert_eq!(level.len(), 2);
    assert_eq!(level.blocks()[0].id(), new.id());
    assert_eq!(level.get("k").unwrap(), value("2"));
}

#[test]
fn test_tier1_may_overlap() {
    let (_dir, factory) = setup();
    let a = block(&factory, &[("a", Some("1")), ("z", Some("1"))]);
    let b = block(&factory, &[("m", Some("2"))]);

    let level = Level::with_blocks(1, vec![b, a]).unwrap();

    assert!(level.check_invariants().is_ok());
    assert_eq!(level.overlapping("n", "y").len(), 1);
    assert_eq!(level.overlapping("k", "n").len(), 2);
}

// =============================================================================
// Sorted Tier Tests
// =============================================================================

#[test]
fn test_sorted_tier_get() {
    let (_dir, factory) = setup();
    let right = block(&factory, &[("m", Some("3")), ("p", Some("4"))]);
    let left = block(&factory, &[("a", Some("1")), ("c", Some("2"))]);

    let level = Level::with_blocks(2, vec![right, left]).unwrap();

    assert_eq!(level.blocks()[0].low(), "a");
    assert_eq!(level.get("a").unwrap(), value("1"));
    assert_eq!(level.get("p").unwrap(), value("4"));
    assert_eq!(level.get("d").unwrap(), None);
    assert_eq!(level.get("zz").unwrap(), None);
}

#[test]
fn test_sorted_tier_rejects_overlap() {
    let (_dir, factory) = setup();
    let a = block(&factory, &[("a", Some("1")), ("m", Some("1"))]);
    let b = block(&factory, &[("k", Some("2")), ("z", Some("2"))]);

    assert!(Level::with_blocks(2, vec![a, b]).is_err());
}

#[test]
fn test_overlapping_selects_intersecting_blocks() {
    let (_dir, factory) = setup();
    let a = block(&factory, &[("a", Some("1")), ("c", Some("1"))]);
    let b = block(&factory, &[("f", Some("1")), ("h", Some("1"))]);
    let c = block(&factory, &[("x", Some("1"))]);
    let level = Level::with_blocks(2, vec![a, b, c]).unwrap();

    let hits: Vec<_> = level.overlapping("b", "g").iter().map(|b| b.low().to_string()).collect();

    assert_eq!(hits, vec!["a", "f"]);
}

// =============================================================================
// merge_blocks Tests
// =============================================================================

#[test]
fn test_merge_into_empty_sorted_tier() {
    let (_dir, factory) = setup();
    let older = block(&factory, &[("a", Some("old")), ("b", Some("old"))]);
    let newer = block(&factory, &[("b", Some("new")), ("c", Some("new"))]);
    let mut level = Level::new(2);

    let merge = level
        .merge_blocks(&[newer, older], &factory, options(100, false))
        .unwrap();
    level.install(&merge);

    assert_eq!(
        dump(&level),
        vec![
            ("a".to_string(), Entry::Value("old".to_string())),
            ("b".to_string(), Entry::Value("new".to_string())),
            ("c".to_string(), Entry::Value("new".to_string())),
        ]
    );
}

#[test]
fn test_merge_splits_at_entry_limit() {
    let (_dir, factory) = setup();
    let incoming = block(
        &factory,
        &[("a", Some("1")), ("b", Some("1")), ("c", Some("1")), ("d", Some("1")), ("e", Some("1"))],
    );
    let mut level = Level::new(2);

    let merge = level.merge_blocks(&[incoming], &factory, options(2, false)).unwrap();
    level.install(&merge);

    assert_eq!(level.len(), 3);
    assert_disjoint(&level);
}

#[test]
fn test_merge_replaces_overlapped_and_keeps_untouched() {
    let (_dir, factory) = setup();
    let left = block(&factory, &[("a", Some("1")), ("c", Some("1"))]);
    let middle = block(&factory, &[("f", Some("1")), ("h", Some("1"))]);
    let right = block(&factory, &[("x", Some("1")), ("z", Some("1"))]);
    let mut level = Level::with_blocks(2, vec![left.clone(), middle.clone(), right.clone()]).unwrap();

    let incoming = block(&factory, &[("g", Some("2"))]);
    let merge = level.merge_blocks(&[incoming], &factory, options(100, false)).unwrap();

    let removed: Vec<BlockId> = merge.removed.iter().map(|b| b.id()).collect();
    assert_eq!(removed, vec![middle.id()]);
    level.install(&merge);

    let ids: HashSet<BlockId> = level.blocks().iter().map(|b| b.id()).collect();
    assert!(ids.contains(&left.id()));
    assert!(ids.contains(&right.id()));
    assert!(!ids.contains(&middle.id()));
    assert_eq!(level.get("g").unwrap(), value("2"));
    assert_eq!(level.get("h").unwrap(), value("1"));
    assert_disjoint(&level);
}

#[test]
fn test_merge_output_fenced_by_untouched_block() {
    let (_dir, factory) = setup();
    let fence = block(&factory, &[("m", Some("fence"))]);
    let mut level = Level::with_blocks(2, vec![fence.clone()]).unwrap();

    // Spans the fence without touching its single key
    let low = block(&factory, &[("a", Some("1"))]);
    let high = block(&factory, &[("z", Some("1"))]);
    let merge = level.merge_blocks(&[high, low], &factory, options(100, false)).unwrap();
    level.install(&merge);

    assert_eq!(level.len(), 3);
    assert_disjoint(&level);
    assert_eq!(level.get("m").unwrap(), value("fence"));
}

#[test]
fn test_tombstones_kept_unless_dropped() {
    let (_dir, factory) = setup();
    let existing = block(&factory, &[("a", Some("1")), ("b", Some("1"))]);

    let mut kept = Level::with_blocks(2, vec![existing.clone()]).unwrap();
    let incoming = block(&factory, &[("a", None)]);
    let merge = kept.merge_blocks(&[incoming], &factory, options(100, false)).unwrap();
    kept.install(&merge);
    assert_eq!(kept.get("a").unwrap(), Some(Entry::Tombstone));

    let mut dropped = Level::with_blocks(2, vec![existing]).unwrap();
    let incoming = block(&factory, &[("a", None)]);
    let merge = dropped.merge_blocks(&[incoming], &factory, options(100, true)).unwrap();
    dropped.install(&merge);
    assert_eq!(dropped.get("a").unwrap(), None);
    assert_eq!(dropped.get("b").unwrap(), value("1"));
}

#[test]
fn test_all_tombstones_produce_no_blocks() {
    let (_dir, factory) = setup();
    let mut level = Level::new(2);
    let incoming = block(&factory, &[("a", None), ("b", None)]);

    let merge = level.merge_blocks(&[incoming], &factory, options(100, true)).unwrap();
    assert!(merge.added.is_empty());
    level.install(&merge);

    assert!(level.is_empty());
}

#[test]
fn test_remove_blocks() {
    let (_dir, factory) = setup();
    let a = block(&factory, &[("a", Some("1"))]);
    let b = block(&factory, &[("b", Some("1"))]);
    let mut level = Level::with_blocks(1, vec![b.clone(), a.clone()]).unwrap();

    level.remove_blocks(&[a.id()].into_iter().collect());

    assert_eq!(level.len(), 1);
    assert_eq!(level.blocks()[0].id(), b.id());
}

#[test]
fn test_abandon_deletes_written_blocks() {
    let (_dir, factory) = setup();
    let level = Level::new(2);
    let incoming = block(&factory, &[("a", Some("1"))]);

    let merge = level.merge_blocks(&[incoming], &factory, options(100, false)).unwrap();
    let paths: Vec<_> = merge.added.iter().map(|b| b.path().to_path_buf()).collect();
    merge.abandon();

    for path in paths {
        assert!(!path.exists());
    }
}

#[test]
fn test_failed_merge_leaves_level_untouched() {
    let (dir, factory) = setup();
    let existing = block(&factory, &[("a", Some("1")), ("c", Some("1"))]);
    let incoming = block(&factory, &[("b", Some("2"))]);
    let level = Level::with_blocks(2, vec![existing.clone()]).unwrap();
    let files_before = std::fs::read_dir(dir.path()).unwrap().count();

    let broken = BlockFactory::new(
        dir.path().join("missing"),
        Arc::clone(factory.cache()),
        factory.next_id(),
    );
    let result = level.merge_blocks(&[incoming], &broken, options(100, false));

    assert!(result.is_err());
    assert_eq!(level.len(), 1);
    assert_eq!(level.blocks()[0].id(), existing.id());
    assert_eq!(level.get("a").unwrap(), value("1"));
    assert_eq!(level.get("b").unwrap(), None);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), files_before);
}

// =============================================================================
// Property Tests
// =============================================================================

fn batch_strategy() -> impl Strategy<Value = Vec<BTreeMap<String, Option<String>>>> {
    let key = "[a-p]{1,2}";
    let entry = prop::option::weighted(0.8, "[0-9]{1,3}");
    prop::collection::vec(prop::collection::btree_map(key, entry, 1..12), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Repeated merges into a sorted tier keep it disjoint, and every key
    /// reads as its most recent record
    #[test]
    fn prop_sorted_tier_merges_stay_disjoint(
        rounds in prop::collection::vec(batch_strategy(), 1..4),
        limit in 1usize..5,
    ) {
        let (_dir, factory) = setup();
        let mut level = Level::new(2);
        let mut model: BTreeMap<String, Entry> = BTreeMap::new();

        for batches in rounds {
            // batches[0] is the newest
            for batch in batches.iter().rev() {
                for (k, v) in batch {
                    let entry = match v {
                        Some(v) => Entry::Value(v.clone()),
                        None => Entry::Tombstone,
                    };
                    model.insert(k.clone(), entry);
                }
            }

            let incoming: Vec<Arc<Block>> = batches
                .iter()
                .map(|batch| {
                    let records: Records = batch
                        .iter()
                        .map(|(k, v)| {
                            let entry = match v {
                                Some(v) => Entry::Value(v.clone()),
                                None => Entry::Tombstone,
                            };
                            (k.clone(), entry)
                        })
                        .collect();
                    factory.create(&records).unwrap()
                })
                .collect();

            let merge = level.merge_blocks(&incoming, &factory, options(limit, false)).unwrap();
            level.install(&merge);

            prop_assert!(level.check_invariants().is_ok());
            for block in level.blocks() {
                prop_assert!(block.contents().unwrap().len() <= limit);
            }
        }

        let contents: BTreeMap<String, Entry> = dump(&level).into_iter().collect();
        prop_assert_eq!(contents, model);
    }
}
