//! Block
//!
//! One immutable, range-bounded block file. Contents are parsed lazily on the
//! first in-range lookup and kept in the shared [`BlockCache`].

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Records;
use crate::cache::BlockCache;
use crate::error::{Result, TierError};
use crate::memtable::Entry;

/// Identity of a block file, stable across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

impl BlockId {
    const PREFIX: &'static str = "block_";
    const EXTENSION: &'static str = "blk";

    /// "block_000042.blk"
    pub fn file_name(&self) -> String {
        format!("{}{:06}.{}", Self::PREFIX, self.0, Self::EXTENSION)
    }

    /// "block_000042.blk" → Some(BlockId(42))
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(Self::EXTENSION)?.strip_suffix('.')?;
        let id_str = stem.strip_prefix(Self::PREFIX)?;
        id_str.parse().ok().map(BlockId)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// What the manifest records about a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub file_name: String,
    /// Smallest key, inclusive
    pub low: String,
    /// Largest key, inclusive
    pub high: String,
}

/// Handle to one immutable block file
///
/// ## Lifecycle
/// - Written once by [`BlockFactory::create`], never modified
/// - Marked obsolete when a compaction supersedes it
/// - The file is removed when the last handle to an obsolete block drops, so
///   readers still holding it keep working
pub struct Block {
    id: BlockId,
    path: PathBuf,
    low: String,
    high: String,
    cache: Arc<BlockCache>,
    obsolete: AtomicBool,
}

impl Block {
    /// Handle to an existing block file. Nothing is read until the first lookup.
    pub fn open(dir: &Path, descriptor: &BlockDescriptor, cache: Arc<BlockCache>) -> Result<Self> {
        let id = BlockId::from_file_name(&descriptor.file_name).ok_or_else(|| {
            TierError::Corruption(format!("invalid block file name {:?}", descriptor.file_name))
        })?;

        Ok(Self {
            id,
            path: dir.join(&descriptor.file_name),
            low: descriptor.low.clone(),
            high: descriptor.high.clone(),
            cache,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Write `records` to a new block file
    ///
    /// The file is written under a temporary name, synced, then renamed, so a
    /// failed write never leaves a file carrying a block name.
    pub fn create(dir: &Path, id: BlockId, records: &Records, cache: Arc<BlockCache>) -> Result<Self> {
        let (low, high) = match (records.first_key(), records.last_key()) {
            (Some(low), Some(high)) => (low.to_string(), high.to_string()),
            _ => {
                return Err(TierError::InvariantViolation(format!(
                    "refusing to write empty block {}",
                    id
                )))
            }
        };

        let path = dir.join(id.file_name());
        let tmp_path = path.with_extension("tmp");

        if let Err(e) = Self::write_file(&tmp_path, &path, records) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        debug!(block = %id, entries = records.len(), low = %low, high = %high, "block written");

        Ok(Self {
            id,
            path,
            low,
            high,
            cache,
            obsolete: AtomicBool::new(false),
        })
    }

    fn write_file(tmp_path: &Path, path: &Path, records: &Records) -> Result<()> {
        let mut writer = BufWriter::new(File::create(tmp_path)?);
        records.write_to(&mut writer)?;
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| TierError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn file_name(&self) -> String {
        self.id.file_name()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    /// Inclusive key bounds
    pub fn range(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            file_name: self.file_name(),
            low: self.low.clone(),
            high: self.high.clone(),
        }
    }

    /// Quick check if a key might be in this block (range check)
    pub fn might_contain(&self, key: &str) -> bool {
        key >= self.low.as_str() && key <= self.high.as_str()
    }

    /// True iff the two inclusive ranges intersect
    pub fn overlaps(&self, other: &Block) -> bool {
        self.overlaps_range(&other.low, &other.high)
    }

    pub fn overlaps_range(&self, low: &str, high: &str) -> bool {
        self.low.as_str() <= high && self.high.as_str() >= low
    }

    /// Look up a key
    ///
    /// Returns:
    /// - `Ok(None)`: key outside the range (no I/O, no cache access) or not in the block
    /// - `Ok(Some(entry))`: live value or tombstone
    /// - `Err(_)`: the block file could not be loaded
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }
        let records = self.contents()?;
        Ok(records.get(key).cloned())
    }

    /// Parsed contents, from the cache or loaded from disk on a miss
    pub fn contents(&self) -> Result<Arc<Records>> {
        if let Some(records) = self.cache.get(self.id) {
            return Ok(records);
        }

        let records = self.load()?;

        // Superseded blocks are still readable but must not re-enter the cache
        if self.is_obsolete() {
            return Ok(Arc::new(records));
        }
        Ok(self.cache.allocate(self.id, records))
    }

    fn load(&self) -> Result<Records> {
        let text = fs::read_to_string(&self.path)?;
        let records = Records::decode(&text)
            .map_err(|e| TierError::Corruption(format!("{}: {}", self.id, e)))?;

        let in_range = match (records.first_key(), records.last_key()) {
            (Some(first), Some(last)) => first >= self.low.as_str() && last <= self.high.as_str(),
            _ => false,
        };
        if !in_range {
            return Err(TierError::Corruption(format!(
                "{} holds keys outside [{:?}, {:?}]",
                self.id, self.low, self.high
            )));
        }

        debug!(block = %self.id, entries = records.len(), "block loaded");
        Ok(records)
    }

    /// Mark the block as superseded; its file goes away with the last handle
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(block = %self.id, "obsolete block removed"),
            Err(e) => warn!(block = %self.id, error = %e, "failed to remove obsolete block"),
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("low", &self.low)
            .field("high", &self.high)
            .finish()
    }
}

/// Allocates block ids and writes new blocks into the blocks directory
pub struct BlockFactory {
    dir: PathBuf,
    cache: Arc<BlockCache>,
    /// Next ID for creating new blocks (atomic, lock-free)
    next_id: AtomicU64,
}

impl BlockFactory {
    pub fn new(dir: impl Into<PathBuf>, cache: Arc<BlockCache>, next_id: u64) -> Self {
        Self {
            dir: dir.into(),
            cache,
            next_id: AtomicU64::new(next_id),
        }
    }

    /// Write a new block holding `records`
    pub fn create(&self, records: &Records) -> Result<Arc<Block>> {
        let id = BlockId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let block = Block::create(&self.dir, id, records, Arc::clone(&self.cache))?;
        Ok(Arc::new(block))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Get the next block ID (for testing/debugging)
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}
