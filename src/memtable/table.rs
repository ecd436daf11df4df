//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::Entry;
use crate::storage::Records;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<String, Entry>>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get the entry for a key (read lock)
    ///
    /// A tombstone is returned as `Some(Entry::Tombstone)`; the caller decides
    /// what a deleted key means.
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.data.read().get(key).cloned()
    }

    /// Put a key-value pair (write lock), returns the new entry count
    pub fn put(&self, key: String, value: String) -> usize {
        self.insert(key, Entry::Value(value))
    }

    /// Delete a key (write lock, inserts tombstone), returns the new entry count
    pub fn delete(&self, key: String) -> usize {
        self.insert(key, Entry::Tombstone)
    }

    fn insert(&self, key: String, entry: Entry) -> usize {
        let mut data = self.data.write();
        data.insert(key, entry);
        data.len()
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if the entry count reached the flush threshold
    pub fn should_flush(&self, entry_limit: usize) -> bool {
        self.entry_count() >= entry_limit
    }

    /// All entries in sorted key order (for flush)
    pub fn iter(&self) -> Vec<(String, Entry)> {
        self.data
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Copy of the entries inside `[low, high]` (for scans)
    pub fn range(&self, low: &str, high: &str) -> Records {
        if low > high {
            return Records::default();
        }
        let data = self.data.read();
        data.range::<str, _>((Bound::Included(low), Bound::Included(high)))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
