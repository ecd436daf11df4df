//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Tombstones that shadow older on-disk values
//! - Track entry count for flush triggers
//! - Ordered iteration for block creation and scans
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for block generation)
//! - The tree replaces the whole memtable on flush, so it is never cleared
//!   underneath a reader

mod table;

pub use table::MemTable;

/// Entry stored in the MemTable and in block files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A live value
    Value(String),

    /// A tombstone (deleted key)
    Tombstone,
}

impl Entry {
    /// Live value, or None for a tombstone
    pub fn value(&self) -> Option<&str> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Tombstone)
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }
}
