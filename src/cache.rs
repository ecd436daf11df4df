//! Block Cache
//!
//! Bounded, shared LRU map from block identity to parsed block contents.
//!
//! ## Concurrency
//! - The recency list is mutated on every hit, so all access goes through a
//!   Mutex even for readers
//! - Contents are handed out as `Arc<Records>`; eviction never invalidates a
//!   reader that already holds them

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::storage::{BlockId, Records};

/// Counters describing cache behaviour since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Contents registered through `allocate` (one per disk load)
    pub loads: u64,
    pub evictions: u64,
}

/// Shared cache of parsed block contents
pub struct BlockCache {
    lru: Mutex<LruCache<BlockId, Arc<Records>>>,
    max_count: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    /// Create a cache holding at most `max_count` blocks (at least one)
    pub fn new(max_count: usize) -> Self {
        let capacity = NonZeroUsize::new(max_count).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            max_count: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Register freshly parsed contents as the most recently used entry
    ///
    /// At capacity, exactly the least recently used entry is evicted first.
    pub fn allocate(&self, id: BlockId, records: Records) -> Arc<Records> {
        let records = Arc::new(records);
        let mut lru = self.lru.lock();

        if !lru.contains(&id) && lru.len() >= self.max_count {
            if let Some((evicted, _)) = lru.pop_lru() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(block = %evicted, "block evicted from cache");
            }
        }
        lru.put(id, Arc::clone(&records));
        self.loads.fetch_add(1, Ordering::Relaxed);

        records
    }

    /// Cached contents, marking `id` as most recently used on a hit
    pub fn get(&self, id: BlockId) -> Option<Arc<Records>> {
        let hit = self.lru.lock().get(&id).cloned();
        match hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Drop `id` if present
    pub fn remove(&self, id: BlockId) -> bool {
        self.lru.lock().pop(&id).is_some()
    }

    /// Presence check that leaves the recency order untouched
    pub fn contains(&self, id: BlockId) -> bool {
        self.lru.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
