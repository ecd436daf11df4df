//! # TierKV
//!
//! A minimal leveled LSM-tree key-value store with:
//! - An in-memory write buffer (memtable) with tombstones
//! - Immutable, range-bounded block files organized into tiers
//! - A shared LRU cache of parsed block contents
//! - Leveled compaction with newest-wins merging
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Tree                                │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  MemTable   │  flush   │   Tier 1    │  overlapping, newest first
//!   │  (RwLock)   │ ───────▶ │   Blocks    │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ compaction
//!                                   ▼
//!                            ┌─────────────┐
//!                            │  Tier 2..N  │  disjoint, sorted by key
//!                            │   Blocks    │
//!                            └──────┬──────┘
//!                                   │ lazy load
//!                                   ▼
//!                            ┌─────────────┐
//!                            │ BlockCache  │  LRU, shared
//!                            └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cache;
pub mod level;
pub mod memtable;
pub mod merge;
pub mod storage;
pub mod tree;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::{BlockCache, CacheStats};
pub use config::Config;
pub use error::{Result, TierError};
pub use memtable::Entry;
pub use tree::{Scan, Tree, TreeStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TierKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
