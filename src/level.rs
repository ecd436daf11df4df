//! Level Module
//!
//! One compaction tier and its lookup/merge discipline.
//!
//! ## Tiers
//! - Tier 1 receives flushed blocks. Ranges may overlap; blocks are kept
//!   newest first and the first hit wins.
//! - Tiers > 1 hold range-disjoint blocks sorted by `low`; at most one block
//!   can contain a key.

use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TierError};
use crate::memtable::Entry;
use crate::merge::{BlockRun, MergeIter, Source};
use crate::storage::{Block, BlockFactory, BlockId, Records};

/// Knobs for rewriting blocks during a merge
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Maximum records per output block
    pub block_entry_limit: usize,
    /// Drop keys whose newest record is a tombstone
    pub drop_tombstones: bool,
}

/// Outcome of [`Level::merge_blocks`], applied with [`Level::install`]
///
/// Nothing is visible to readers until `install` runs, so a merge that fails
/// part way leaves the level untouched.
#[derive(Debug)]
pub struct LevelMerge {
    /// Blocks entering this level (newly written, or the incoming blocks for tier 1)
    pub added: Vec<Arc<Block>>,
    /// Existing blocks of this level superseded by `added`
    pub removed: Vec<Arc<Block>>,
    /// Full block list of the level after install
    layout: Vec<Arc<Block>>,
}

impl LevelMerge {
    /// Newly written blocks are abandoned: their files go with the last handle
    pub fn abandon(self) {
        for block in &self.added {
            block.mark_obsolete();
        }
    }
}

/// An ordered collection of blocks belonging to one tier
#[derive(Debug)]
pub struct Level {
    tier: u32,
    blocks: Vec<Arc<Block>>,
}

impl Level {
    pub fn new(tier: u32) -> Self {
        Self {
            tier,
            blocks: Vec::new(),
        }
    }

    /// Build a level from existing blocks
    ///
    /// Tier 1 blocks must be given newest first. Tier > 1 blocks are sorted
    /// and checked for overlap.
    pub fn with_blocks(tier: u32, mut blocks: Vec<Arc<Block>>) -> Result<Self> {
        if tier > 1 {
            blocks.sort_by(|a, b| a.low().cmp(b.low()));
            check_disjoint(tier, &blocks)?;
        }
        Ok(Self { tier, blocks })
    }

    pub fn tier(&self) -> u32 {
        self.tier
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in lookup order
    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    fn is_sorted_tier(&self) -> bool {
        self.tier > 1
    }

    /// Look up a key in this level
    ///
    /// Returns the definitive entry (value or tombstone) or None when no block
    /// holds the key. Block load errors are returned, never read as absence.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        if self.is_sorted_tier() {
            let idx = self.blocks.partition_point(|b| b.high() < key);
            return match self.blocks.get(idx) {
                Some(block) => block.get(key),
                None => Ok(None),
            };
        }

        // Newest first: the first hit is the most recent committed record
        for block in &self.blocks {
            if let Some(entry) = block.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Blocks whose range intersects `[low, high]`, in lookup order
    pub fn overlapping(&self, low: &str, high: &str) -> Vec<Arc<Block>> {
        self.blocks
            .iter()
            .filter(|b| b.overlaps_range(low, high))
            .cloned()
            .collect()
    }

    /// Readers for a scan of `[low, high]`, newest first
    ///
    /// Tier 1 yields one source per block; a sorted tier is a single run.
    pub fn scan_sources(&self, low: &str, high: &str) -> Vec<Source> {
        let bounds = || {
            (
                Bound::Included(low.to_string()),
                Bound::Included(high.to_string()),
            )
        };
        let blocks = self.overlapping(low, high);
        if blocks.is_empty() {
            return Vec::new();
        }

        if self.is_sorted_tier() {
            let (lower, upper) = bounds();
            return vec![Box::new(BlockRun::new(blocks, lower, upper)) as Source];
        }
        blocks
            .into_iter()
            .map(|block| {
                let (lower, upper) = bounds();
                Box::new(BlockRun::new(vec![block], lower, upper)) as Source
            })
            .collect()
    }

    /// Prepare the arrival of `incoming` (newest first) into this level
    ///
    /// Tier 1 takes the blocks as they are. A sorted tier k-way merges the
    /// incoming blocks with every existing block they overlap, keeping the
    /// newest record per key, and writes the result as new disjoint blocks.
    /// Existing blocks that overlap nothing stay untouched.
    pub fn merge_blocks(
        &self,
        incoming: &[Arc<Block>],
        factory: &BlockFactory,
        options: MergeOptions,
    ) -> Result<LevelMerge> {
        if !self.is_sorted_tier() {
            let mut layout: Vec<Arc<Block>> = incoming.to_vec();
            layout.extend(self.blocks.iter().cloned());
            return Ok(LevelMerge {
                added: incoming.to_vec(),
                removed: Vec::new(),
                layout,
            });
        }

        let mut seen: HashSet<BlockId> = HashSet::new();
        let mut removed = Vec::new();
        for block in incoming {
            for existing in self.blocks.iter().filter(|b| b.overlaps(block)) {
                if seen.insert(existing.id()) {
                    removed.push(Arc::clone(existing));
                }
            }
        }
        removed.sort_by(|a, b| a.low().cmp(b.low()));

        let untouched: Vec<Arc<Block>> = self
            .blocks
            .iter()
            .filter(|b| !seen.contains(&b.id()))
            .cloned()
            .collect();

        let mut sources: Vec<Source> = incoming
            .iter()
            .map(|block| Box::new(BlockRun::full(vec![Arc::clone(block)])) as Source)
            .collect();
        if !removed.is_empty() {
            sources.push(Box::new(BlockRun::full(removed.clone())));
        }

        let mut added = Vec::new();
        if let Err(e) = write_merged(MergeIter::new(sources), &untouched, factory, options, &mut added) {
            for block in &added {
                block.mark_obsolete();
            }
            return Err(e);
        }

        let mut layout = untouched;
        layout.extend(added.iter().cloned());
        layout.sort_by(|a, b| a.low().cmp(b.low()));

        let merge = LevelMerge {
            added,
            removed,
            layout,
        };
        if let Err(e) = check_disjoint(self.tier, &merge.layout) {
            merge.abandon();
            return Err(e);
        }

        debug!(
            tier = self.tier,
            incoming = incoming.len(),
            replaced = merge.removed.len(),
            written = merge.added.len(),
            "level merge prepared"
        );
        Ok(merge)
    }

    /// Make a prepared merge visible
    pub fn install(&mut self, merge: &LevelMerge) {
        self.blocks = merge.layout.clone();
    }

    /// Take blocks out of this level (after they moved to the next tier)
    pub fn remove_blocks(&mut self, ids: &HashSet<BlockId>) {
        self.blocks.retain(|b| !ids.contains(&b.id()));
    }

    /// Verify the tier's ordering invariant
    pub fn check_invariants(&self) -> Result<()> {
        if self.is_sorted_tier() {
            check_disjoint(self.tier, &self.blocks)?;
        }
        Ok(())
    }
}

/// Stream merged records into new blocks
///
/// A block is cut at `block_entry_limit` records and wherever an untouched
/// block sits between two consecutive keys, so output never straddles it.
fn write_merged(
    merged: MergeIter,
    untouched: &[Arc<Block>],
    factory: &BlockFactory,
    options: MergeOptions,
    added: &mut Vec<Arc<Block>>,
) -> Result<()> {
    let mut chunk = Records::new();
    let mut last_key: Option<String> = None;

    for item in merged {
        let (key, entry) = item?;
        if options.drop_tombstones && entry.is_tombstone() {
            continue;
        }

        if let Some(last) = &last_key {
            let idx = untouched.partition_point(|b| b.low() <= last.as_str());
            let fenced = untouched.get(idx).is_some_and(|b| b.low() < key.as_str());
            if fenced && !chunk.is_empty() {
                added.push(factory.create(&chunk)?);
                chunk = Records::new();
            }
        }

        last_key = Some(key.clone());
        chunk.insert(key, entry);

        if chunk.len() >= options.block_entry_limit {
            added.push(factory.create(&chunk)?);
            chunk = Records::new();
        }
    }

    if !chunk.is_empty() {
        added.push(factory.create(&chunk)?);
    }
    Ok(())
}

/// No two blocks of a sorted tier may overlap
fn check_disjoint(tier: u32, blocks: &[Arc<Block>]) -> Result<()> {
    for pair in blocks.windows(2) {
        if pair[0].high() >= pair[1].low() {
            return Err(TierError::InvariantViolation(format!(
                "tier {}: {} [{:?}, {:?}] overlaps {} [{:?}, {:?}]",
                tier,
                pair[0].id(),
                pair[0].low(),
                pair[0].high(),
                pair[1].id(),
                pair[1].low(),
                pair[1].high()
            )));
        }
    }
    Ok(())
}
