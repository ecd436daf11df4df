//! Merge Iterator
//!
//! k-way merge of sorted record streams. Sources are ranked by recency: a
//! lower index is newer. For keys present in several sources only the newest
//! record survives.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::Result;
use crate::memtable::Entry;
use crate::storage::{Block, Records};

/// A sorted stream of unique keys
pub type Source = Box<dyn Iterator<Item = Result<(String, Entry)>> + Send>;

#[derive(Debug, PartialEq, Eq)]
struct HeapItem {
    key: String,
    entry: Entry,
    source: usize,
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap: reverse so the smallest key, then the newest
    // source, pops first
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.source.cmp(&other.source))
            .reverse()
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Newest-wins merge over ranked sources
///
/// Yields every key once, ascending, tombstones included. Stops after the
/// first source error.
pub struct MergeIter {
    sources: Vec<Source>,
    heap: BinaryHeap<HeapItem>,
    primed: bool,
    failed: bool,
}

impl MergeIter {
    /// `sources[0]` is the newest
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
            failed: false,
        }
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.sources[source].next() {
            let (key, entry) = next?;
            self.heap.push(HeapItem { key, entry, source });
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Option<(String, Entry)>> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.advance(source)?;
            }
        }

        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(top.source)?;

        // Older versions of the same key
        while self.heap.peek().is_some_and(|item| item.key == top.key) {
            if let Some(stale) = self.heap.pop() {
                self.advance(stale.source)?;
            }
        }

        Ok(Some((top.key, top.entry)))
    }
}

impl Iterator for MergeIter {
    type Item = Result<(String, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn as_str_bound(bound: &Bound<String>) -> Bound<&str> {
    match bound {
        Bound::Included(s) => Bound::Included(s.as_str()),
        Bound::Excluded(s) => Bound::Excluded(s.as_str()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// True when `(lower, upper)` cannot contain any key
fn is_empty_range(lower: &Bound<String>, upper: &Bound<String>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

/// Walks one `Records` map inside a key range without borrowing it
pub struct RecordsCursor {
    records: Arc<Records>,
    lower: Bound<String>,
    upper: Bound<String>,
}

impl RecordsCursor {
    pub fn new(records: Arc<Records>, lower: Bound<String>, upper: Bound<String>) -> Self {
        Self {
            records,
            lower,
            upper,
        }
    }

    pub fn full(records: Arc<Records>) -> Self {
        Self::new(records, Bound::Unbounded, Bound::Unbounded)
    }
}

impl Iterator for RecordsCursor {
    type Item = (String, Entry);

    fn next(&mut self) -> Option<Self::Item> {
        if is_empty_range(&self.lower, &self.upper) {
            return None;
        }
        let (key, entry) = self
            .records
            .range(as_str_bound(&self.lower), as_str_bound(&self.upper))
            .next()
            .map(|(k, e)| (k.clone(), e.clone()))?;
        self.lower = Bound::Excluded(key.clone());
        Some((key, entry))
    }
}

/// Key-ordered, non-overlapping blocks read one after another
///
/// Each block's contents are loaded only when the run reaches it.
pub struct BlockRun {
    blocks: std::vec::IntoIter<Arc<Block>>,
    current: Option<RecordsCursor>,
    lower: Bound<String>,
    upper: Bound<String>,
}

impl BlockRun {
    pub fn new(blocks: Vec<Arc<Block>>, lower: Bound<String>, upper: Bound<String>) -> Self {
        Self {
            blocks: blocks.into_iter(),
            current: None,
            lower,
            upper,
        }
    }

    pub fn full(blocks: Vec<Arc<Block>>) -> Self {
        Self::new(blocks, Bound::Unbounded, Bound::Unbounded)
    }
}

impl Iterator for BlockRun {
    type Item = Result<(String, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                return Some(Ok(item));
            }
            let block = self.blocks.next()?;
            match block.contents() {
                Ok(records) => {
                    self.current = Some(RecordsCursor::new(
                        records,
                        self.lower.clone(),
                        self.upper.clone(),
                    ));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
