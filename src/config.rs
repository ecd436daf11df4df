//! Configuration for TierKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, TierError};

/// Main configuration for a TierKV tree
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (block registry)
    ///     └── blocks/          (block files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Number of entries (tombstones included) that triggers a flush
    pub memtable_entry_limit: usize,

    // -------------------------------------------------------------------------
    // Level Configuration
    // -------------------------------------------------------------------------
    /// Tier 1 block count that triggers compaction into tier 2
    pub level1_block_limit: usize,

    /// Tier 2 block count threshold
    pub level_block_limit: usize,

    /// Growth factor of the block count threshold for each tier past 2
    pub level_size_multiplier: usize,

    /// Maximum records per block written by compaction
    pub block_entry_limit: usize,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Maximum number of parsed blocks held by the block cache
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tierkv_data"),
            memtable_entry_limit: 1024,
            level1_block_limit: 4,
            level_block_limit: 10,
            level_size_multiplier: 10,
            block_entry_limit: 1024,
            cache_capacity: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the tree cannot run with
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("memtable_entry_limit", self.memtable_entry_limit),
            ("level1_block_limit", self.level1_block_limit),
            ("level_block_limit", self.level_block_limit),
            ("level_size_multiplier", self.level_size_multiplier),
            ("block_entry_limit", self.block_entry_limit),
            ("cache_capacity", self.cache_capacity),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(TierError::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    /// Block count at which `tier` overflows into the next one
    pub fn level_block_limit_for(&self, tier: u32) -> usize {
        match tier {
            0 | 1 => self.level1_block_limit,
            n => {
                let growth = self.level_size_multiplier.saturating_pow(n - 2);
                self.level_block_limit.saturating_mul(growth)
            }
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the memtable flush threshold (entry count)
    pub fn memtable_entry_limit(mut self, entries: usize) -> Self {
        self.config.memtable_entry_limit = entries;
        self
    }

    /// Set the tier 1 block count threshold
    pub fn level1_block_limit(mut self, blocks: usize) -> Self {
        self.config.level1_block_limit = blocks;
        self
    }

    /// Set the tier 2 block count threshold
    pub fn level_block_limit(mut self, blocks: usize) -> Self {
        self.config.level_block_limit = blocks;
        self
    }

    /// Set the per-tier threshold growth factor
    pub fn level_size_multiplier(mut self, factor: usize) -> Self {
        self.config.level_size_multiplier = factor;
        self
    }

    /// Set the maximum records per compacted block
    pub fn block_entry_limit(mut self, entries: usize) -> Self {
        self.config.block_entry_limit = entries;
        self
    }

    /// Set the block cache capacity (entry count)
    pub fn cache_capacity(mut self, blocks: usize) -> Self {
        self.config.cache_capacity = blocks;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
