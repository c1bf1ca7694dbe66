//! Key ranges recovered from backup files

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{format_key, hex_bytes};

/// Right-open raw key range `[start_key, end_key)`; an empty `end_key` is
/// unbounded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    #[serde(with = "hex_bytes")]
    pub start_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub end_key: Vec<u8>,
}

impl KeyRange {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_key.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.is_unbounded() || key < self.end_key.as_slice())
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_key(&self.start_key),
            format_key(&self.end_key)
        )
    }
}

/// Range validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range {0}: start key must be less than end key")]
    Inverted(KeyRange),
    #[error("ranges overlapped: {0} and {1}")]
    Overlapped(KeyRange, KeyRange),
}

/// Sort ranges by start key
///
/// Exact duplicates are dropped. Inverted ranges and overlapping ranges are
/// rejected. Only the last range may be unbounded.
pub fn sort_ranges(mut ranges: Vec<KeyRange>) -> Result<Vec<KeyRange>, RangeError> {
    for range in &ranges {
        if !range.is_unbounded() && range.start_key >= range.end_key {
            return Err(RangeError::Inverted(range.clone()));
        }
    }

    ranges.sort_by(|a, b| a.start_key.cmp(&b.start_key).then(a.end_key.cmp(&b.end_key)));
    ranges.dedup();

    for pair in ranges.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.is_unbounded() || prev.end_key > next.start_key {
            return Err(RangeError::Overlapped(prev.clone(), next.clone()));
        }
    }

    Ok(ranges)
}

/// Smallest range covering every range of a sorted list
pub fn span(sorted: &[KeyRange]) -> Option<KeyRange> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    Some(KeyRange::new(first.start_key.clone(), last.end_key.clone()))
}
