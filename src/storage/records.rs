//! Block records
//!
//! Sorted key → entry map shared by the block cache, and the line codec used
//! for block files.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::Bound;

use crate::error::{Result, TierError};
use crate::memtable::Entry;

/// Separates a key from its value on a live record line
const SEPARATOR: char = ':';

/// Terminates every record
const TERMINATOR: char = '\n';

/// Sorted, immutable-once-built contents of one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Records {
    map: BTreeMap<String, Entry>,
}

impl Records {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn first_key(&self) -> Option<&str> {
        self.map.keys().next().map(String::as_str)
    }

    pub fn last_key(&self) -> Option<&str> {
        self.map.keys().next_back().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Entry> {
        self.map.iter()
    }

    pub fn range<'a>(
        &'a self,
        lower: Bound<&'a str>,
        upper: Bound<&'a str>,
    ) -> btree_map::Range<'a, String, Entry> {
        self.map.range::<str, _>((lower, upper))
    }

    pub fn insert(&mut self, key: String, entry: Entry) -> Option<Entry> {
        self.map.insert(key, entry)
    }

    /// Write every record as one line, keys ascending
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for (key, entry) in &self.map {
            match entry {
                Entry::Value(value) => {
                    write!(writer, "{}{}{}{}", key, SEPARATOR, value, TERMINATOR)?
                }
                Entry::Tombstone => write!(writer, "{}{}", key, TERMINATOR)?,
            }
        }
        Ok(())
    }

    /// Parse block file text
    ///
    /// Keys must be strictly ascending; anything else is corruption.
    pub fn decode(text: &str) -> Result<Self> {
        let mut records = Records::new();
        let mut previous: Option<&str> = None;

        for (line_no, line) in text.split_terminator(TERMINATOR).enumerate() {
            let (key, entry) = match line.split_once(SEPARATOR) {
                Some((key, value)) => (key, Entry::Value(value.to_string())),
                None => (line, Entry::Tombstone),
            };

            if let Some(prev) = previous {
                if key <= prev {
                    return Err(TierError::Corruption(format!(
                        "line {}: key {:?} is not greater than {:?}",
                        line_no + 1,
                        key,
                        prev
                    )));
                }
            }
            previous = Some(key);
            records.map.insert(key.to_string(), entry);
        }

        if !text.is_empty() && !text.ends_with(TERMINATOR) {
            return Err(TierError::Corruption(
                "last record is not newline terminated".to_string(),
            ));
        }

        Ok(records)
    }
}

impl FromIterator<(String, Entry)> for Records {
    fn from_iter<T: IntoIterator<Item = (String, Entry)>>(iter: T) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Records {
    type Item = (String, Entry);
    type IntoIter = btree_map::IntoIter<String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

/// Keys may not contain the separator or the terminator
pub fn validate_key(key: &str) -> Result<()> {
    if key.contains(SEPARATOR) || key.contains(TERMINATOR) {
        return Err(TierError::InvalidKey(format!(
            "{:?} contains ':' or a newline",
            key
        )));
    }
    Ok(())
}

/// Values may not contain the terminator
pub fn validate_value(value: &str) -> Result<()> {
    if value.contains(TERMINATOR) {
        return Err(TierError::InvalidValue(format!(
            "{:?} contains a newline",
            value
        )));
    }
    Ok(())
}
