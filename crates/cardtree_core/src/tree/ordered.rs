//! Ordered sibling arrays.
//!
//! Siblings under one parent are totally ordered by the
//! `(fractional_index, id)` tuple: the fractional index carries the intended
//! position, the id breaks ties when two replicas generated the same index
//! for the same logical position. Insertion is idempotent — re-inserting an
//! id that is already present leaves the array untouched.

use crate::tree::CardId;

/// One entry in a parent's ordered children array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingRef {
    /// The child's fractional index.
    pub fractional_index: String,

    /// The child's id.
    pub id: CardId,
}

impl SiblingRef {
    /// Build a sibling entry.
    pub fn new(fractional_index: impl Into<String>, id: impl Into<CardId>) -> Self {
        Self {
            fractional_index: fractional_index.into(),
            id: id.into(),
        }
    }

    fn sort_key(&self) -> (&str, &str) {
        (self.fractional_index.as_str(), self.id.as_str())
    }
}

/// Insert `item` into its sorted position.
///
/// Binary search finds the insertion point; an entry with the same id is
/// left alone and `false` is returned (distinguishing this from a naive
/// binary-search-insert that would duplicate). Returns `true` if the array
/// changed.
pub fn ordered_insert(siblings: &mut Vec<SiblingRef>, item: SiblingRef) -> bool {
    if siblings.iter().any(|s| s.id == item.id) {
        return false;
    }
    let pos = siblings.partition_point(|s| s.sort_key() < item.sort_key());
    siblings.insert(pos, item);
    true
}

/// Remove the entry with the given id.
///
/// Returns `true` if an entry was removed.
pub fn ordered_remove(siblings: &mut Vec<SiblingRef>, id: &CardId) -> bool {
    match siblings.iter().position(|s| &s.id == id) {
        Some(pos) => {
            siblings.remove(pos);
            true
        }
        None => false,
    }
}

/// Whether the array is sorted by `(fractional_index, id)` with unique ids.
#[cfg(test)]
pub fn is_ordered(siblings: &[SiblingRef]) -> bool {
    siblings.windows(2).all(|w| w[0].sort_key() < w[1].sort_key())
}
