//! Tree Module
//!
//! The storage engine: memtable, levels, flush and leveled compaction.
//!
//! ## Responsibilities
//! - Serve put/delete/get/scan
//! - Flush the memtable into a new tier 1 block when it fills up
//! - Cascade compaction into deeper tiers when a tier overflows
//! - Rebuild the levels from the manifest on startup

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::{BlockCache, CacheStats};
use crate::config::Config;
use crate::error::{Result, TierError};
use crate::level::{Level, MergeOptions};
use crate::memtable::{Entry, MemTable};
use crate::merge::{MergeIter, RecordsCursor, Source};
use crate::storage::{
    validate_key, validate_value, Block, BlockDescriptor, BlockFactory, BlockId, Manifest,
    ManifestEdit, Records,
};

/// Point-in-time counters for a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    pub memtable_entries: usize,
    /// Index 0 is tier 1
    pub blocks_per_tier: Vec<usize>,
    pub cache: CacheStats,
}

/// The LSM tree
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/flush/compact): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Block files are written before any lock readers need is taken
///
/// - **Reads** (get/scan): Concurrent
///   - Take the levels read lock, then clone the memtable handle under it
///   - A flush installs its block and swaps in a fresh memtable under the
///     levels write lock, so a reader sees either the old memtable without
///     the block or the new memtable with it
///
/// - **Superseded blocks**: removed from the level list, evicted from the
///   cache, then their files are deleted once no reader holds them
pub struct Tree {
    /// Tree configuration
    config: Config,

    /// Directory holding the block files
    blocks_dir: PathBuf,

    /// Parsed block contents shared by every block
    cache: Arc<BlockCache>,

    /// Writes new blocks and allocates their ids
    factory: BlockFactory,

    /// Durable block registry
    manifest: Manifest,

    /// Current write buffer; replaced, never cleared, on flush
    memtable: RwLock<Arc<MemTable>>,

    /// Index 0 is tier 1
    levels: RwLock<Vec<Level>>,

    /// Serializes write operations (put/delete/flush/compact)
    write_lock: Mutex<()>,

    /// Set once an invariant violation was detected
    halted: AtomicBool,
}

impl Tree {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const MANIFEST_FILENAME: &'static str = "MANIFEST";
    const BLOCK_DIR: &'static str = "blocks";

    /// Open or create a tree with the given config
    ///
    /// On startup:
    /// 1. Create the data and block directories
    /// 2. Replay the manifest into levels
    /// 3. Remove block files the manifest does not reference
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Directories
        fs::create_dir_all(&config.data_dir)?;
        let blocks_dir = config.data_dir.join(Self::BLOCK_DIR);
        fs::create_dir_all(&blocks_dir)?;

        // Step 2: Manifest → levels
        let cache = Arc::new(BlockCache::new(config.cache_capacity));
        let manifest = Manifest::open(&config.data_dir.join(Self::MANIFEST_FILENAME))?;
        let live = manifest.load()?;

        let mut tiers: BTreeMap<u32, Vec<Arc<Block>>> = BTreeMap::new();
        let mut referenced: HashSet<BlockId> = HashSet::new();
        let mut max_id = 0;

        for (tier, descriptor) in &live {
            if *tier == 0 {
                return Err(TierError::Corruption(format!(
                    "manifest places {} in tier 0",
                    descriptor.file_name
                )));
            }
            let block = Block::open(&blocks_dir, descriptor, Arc::clone(&cache))?;
            if !block.path().exists() {
                return Err(TierError::InvariantViolation(format!(
                    "manifest references missing block file {}",
                    block.path().display()
                )));
            }
            max_id = max_id.max(block.id().0);
            referenced.insert(block.id());
            tiers.entry(*tier).or_default().push(Arc::new(block));
        }

        let deepest = tiers.keys().next_back().copied().unwrap_or(1);
        let mut levels = Vec::with_capacity(deepest as usize);
        for tier in 1..=deepest {
            let mut blocks = tiers.remove(&tier).unwrap_or_default();
            if tier == 1 {
                // Manifest order is oldest first
                blocks.reverse();
            }
            levels.push(Level::with_blocks(tier, blocks)?);
        }

        // Step 3: Leftovers of aborted writes
        Self::remove_orphans(&blocks_dir, &referenced)?;

        info!(
            data_dir = %config.data_dir.display(),
            blocks = live.len(),
            tiers = levels.len(),
            "tree opened"
        );

        let factory = BlockFactory::new(&blocks_dir, Arc::clone(&cache), max_id + 1);

        Ok(Self {
            config,
            blocks_dir,
            cache,
            factory,
            manifest,
            memtable: RwLock::new(Arc::new(MemTable::new())),
            levels: RwLock::new(levels),
            write_lock: Mutex::new(()),
            halted: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn remove_orphans(blocks_dir: &Path, referenced: &HashSet<BlockId>) -> Result<()> {
        for dir_entry in fs::read_dir(blocks_dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let orphan = match BlockId::from_file_name(name) {
                Some(id) => !referenced.contains(&id),
                None => name.ends_with(".tmp"),
            };
            if orphan {
                warn!(file = %path.display(), "removing orphaned block file");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. Levels, tier 1 first
    ///
    /// The first definitive record wins; a tombstone reads as absent.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        // Levels first: a flush swaps the memtable under the levels write lock
        let levels = self.levels.read();
        let memtable = Arc::clone(&self.memtable.read());
        if let Some(entry) = memtable.get(key) {
            return Ok(entry.into_value());
        }

        for level in levels.iter() {
            if let Some(entry) = level.get(key)? {
                return Ok(entry.into_value());
            }
        }
        Ok(None)
    }

    /// Iterate live pairs with `low <= key <= high`, ascending
    ///
    /// Block contents are loaded as the scan reaches them. Each call starts
    /// from scratch; nothing is kept between calls.
    pub fn scan(&self, low: &str, high: &str) -> Scan {
        let levels = self.levels.read();
        let memtable = Arc::clone(&self.memtable.read());
        let newest: Source =
            Box::new(RecordsCursor::full(Arc::new(memtable.range(low, high))).map(Ok));
        let mut sources = vec![newest];

        for level in levels.iter() {
            sources.extend(level.scan_sources(low, high));
        }
        drop(levels);

        Scan {
            inner: MergeIter::new(sources),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    ///
    /// Keys may not contain ':' or newlines; values may not contain newlines.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;

        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        self.memtable.read().put(key.to_string(), value.to_string());
        self.check(self.maybe_compaction())
    }

    /// Delete a key
    ///
    /// Writes a tombstone that shadows older on-disk values until compaction
    /// drops them both.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        self.memtable.read().delete(key.to_string());
        self.check(self.maybe_compaction())
    }

    /// Flush the memtable to tier 1 regardless of its size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        self.check(self.flush_memtable().and_then(|_| self.compact_overflowing()))
    }

    /// Flush, then push every tier 1 block into tier 2 and cascade
    pub fn compact(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.ensure_writable()?;

        let result = self
            .flush_memtable()
            .and_then(|_| self.compact_tier(1))
            .and_then(|_| self.compact_overflowing());
        self.check(result)
    }

    /// Close the tree gracefully, flushing pending writes
    ///
    /// A halted tree cannot flush; unflushed writes are reported as `Halted`.
    pub fn close(self) -> Result<()> {
        if self.is_halted() {
            if self.memtable.read().is_empty() {
                return Ok(());
            }
            return Err(TierError::Halted);
        }
        self.flush()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_halted() {
            return Err(TierError::Halted);
        }
        Ok(())
    }

    /// Halt writes on an invariant violation
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(TierError::InvariantViolation(msg)) = &result {
            error!(error = %msg, "invariant violation, halting writes");
            self.halted.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Flush if the memtable is full, then compact overflowing tiers
    /// (called with write lock held)
    fn maybe_compaction(&self) -> Result<()> {
        let full = self
            .memtable
            .read()
            .should_flush(self.config.memtable_entry_limit);
        if full {
            self.flush_memtable()?;
        }
        self.compact_overflowing()
    }

    /// Write the memtable as one tier 1 block (called with write lock held)
    fn flush_memtable(&self) -> Result<()> {
        let memtable = Arc::clone(&self.memtable.read());
        if memtable.is_empty() {
            return Ok(());
        }

        // Tombstones are written too, they still shadow older tiers
        let records: Records = memtable.iter().into_iter().collect();
        let block = self.factory.create(&records)?;

        if let Err(e) = self.manifest.append(1, &block.descriptor()) {
            block.mark_obsolete();
            return Err(e);
        }

        {
            let mut levels = self.levels.write();
            if levels.is_empty() {
                levels.push(Level::new(1));
            }
            let merge = levels[0].merge_blocks(
                &[Arc::clone(&block)],
                &self.factory,
                self.merge_options(false),
            )?;
            levels[0].install(&merge);

            // Visible together with the new block
            *self.memtable.write() = Arc::new(MemTable::new());
        }

        info!(block = %block.id(), entries = records.len(), "memtable flushed");
        Ok(())
    }

    /// Cascade compaction through every overflowing tier
    /// (called with write lock held)
    fn compact_overflowing(&self) -> Result<()> {
        let mut tier = 1;
        loop {
            let overflowing = {
                let levels = self.levels.read();
                match levels.get(tier as usize - 1) {
                    Some(level) => level.len() > self.config.level_block_limit_for(tier),
                    None => break,
                }
            };
            if overflowing {
                self.compact_tier(tier)?;
            }
            tier += 1;
        }
        Ok(())
    }

    /// Move every block of `tier` into `tier + 1` (called with write lock held)
    ///
    /// Two phases: new blocks and the manifest commit are written first, and
    /// only then does the level swap become visible. Any failure before the
    /// swap leaves the previous state registered and intact.
    fn compact_tier(&self, tier: u32) -> Result<()> {
        let source = tier as usize - 1;
        let target = source + 1;

        let (incoming, drop_tombstones) = {
            let mut levels = self.levels.write();
            if source >= levels.len() {
                return Ok(());
            }
            if target >= levels.len() {
                levels.push(Level::new(tier + 1));
            }
            let incoming = levels[source].blocks().to_vec();
            let missing = incoming
                .iter()
                .chain(levels[target].blocks().iter().filter(|existing| {
                    incoming.iter().any(|block| block.overlaps(existing))
                }))
                .find(|block| !block.path().exists());
            if let Some(block) = missing {
                return Err(TierError::InvariantViolation(format!(
                    "tier {} compaction: registered block file {} is missing",
                    tier,
                    block.path().display()
                )));
            }
            // Tombstones may only go when nothing older can sit below
            let drop_tombstones = levels[target + 1..].iter().all(Level::is_empty);
            (incoming, drop_tombstones)
        };
        if incoming.is_empty() {
            return Ok(());
        }

        // Phase 1: write merged blocks
        let merge = {
            let levels = self.levels.read();
            levels[target].merge_blocks(&incoming, &self.factory, self.merge_options(drop_tombstones))?
        };

        let mut edits: Vec<ManifestEdit> = merge
            .added
            .iter()
            .map(|block| ManifestEdit::Add {
                tier: tier + 1,
                block: block.descriptor(),
            })
            .collect();
        edits.extend(incoming.iter().map(|block| ManifestEdit::Remove {
            tier,
            file_name: block.file_name(),
        }));
        edits.extend(merge.removed.iter().map(|block| ManifestEdit::Remove {
            tier: tier + 1,
            file_name: block.file_name(),
        }));

        if let Err(e) = self.manifest.commit(&edits) {
            merge.abandon();
            return Err(e);
        }

        // Phase 2: switch visibility
        {
            let mut levels = self.levels.write();
            let moved: HashSet<BlockId> = incoming.iter().map(|b| b.id()).collect();
            levels[source].remove_blocks(&moved);
            levels[target].install(&merge);
        }

        // Phase 3: retire superseded blocks
        for block in incoming.iter().chain(merge.removed.iter()) {
            // Obsolete first, so a concurrent load cannot re-cache it
            block.mark_obsolete();
            self.cache.remove(block.id());
        }

        info!(
            from_tier = tier,
            to_tier = tier + 1,
            blocks_in = incoming.len() + merge.removed.len(),
            blocks_out = merge.added.len(),
            drop_tombstones,
            "compaction finished"
        );
        Ok(())
    }

    fn merge_options(&self, drop_tombstones: bool) -> MergeOptions {
        MergeOptions {
            block_entry_limit: self.config.block_entry_limit,
            drop_tombstones,
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the block directory path
    pub fn blocks_dir(&self) -> &Path {
        &self.blocks_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the shared block cache
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.read().entry_count()
    }

    /// Number of tiers, empty ones included
    pub fn level_count(&self) -> usize {
        self.levels.read().len()
    }

    /// Number of blocks in `tier` (0 for a tier that does not exist)
    pub fn block_count(&self, tier: u32) -> usize {
        let levels = self.levels.read();
        match tier.checked_sub(1) {
            Some(idx) => levels.get(idx as usize).map_or(0, Level::len),
            None => 0,
        }
    }

    /// Descriptors of the blocks in `tier`, in lookup order
    pub fn blocks_in_tier(&self, tier: u32) -> Vec<BlockDescriptor> {
        let levels = self.levels.read();
        match tier.checked_sub(1).and_then(|idx| levels.get(idx as usize)) {
            Some(level) => level.blocks().iter().map(|b| b.descriptor()).collect(),
            None => Vec::new(),
        }
    }

    /// Whether writes were halted by an invariant violation
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TreeStats {
        let memtable_entries = self.memtable_entry_count();
        let blocks_per_tier = self.levels.read().iter().map(Level::len).collect();
        let stats = TreeStats {
            memtable_entries,
            blocks_per_tier,
            cache: self.cache.stats(),
        };
        debug!(?stats, "tree stats");
        stats
    }
}

/// Live pairs of a [`Tree::scan`], ascending and unique
///
/// Yields an error and stops if a block cannot be loaded.
pub struct Scan {
    inner: MergeIter,
}

impl Iterator for Scan {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok((key, Entry::Value(value))) => return Some(Ok((key, value))),
                Ok((_, Entry::Tombstone)) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
