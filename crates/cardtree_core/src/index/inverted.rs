//! Generic inverted index over card-to-card references.
//!
//! Tracks, for every target, the set of sources currently referencing it.
//! Updates are incremental: when a source's reference set changes, only the
//! symmetric difference between the previous and current sets is touched,
//! so an edit that leaves references alone costs nothing. Sources must be
//! released explicitly when a card leaves the engine; nothing here is tied
//! to drop order.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexSet;

use crate::tree::CardId;

/// Target → sources mapping maintained by diffing each source's forward set.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    /// Sources referencing each target, in insertion order.
    buckets: HashMap<CardId, IndexSet<CardId>>,
    /// The forward set last observed for each source; the baseline diffs
    /// are computed against.
    forward: HashMap<CardId, BTreeSet<CardId>>,
}

impl InvertedIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current reference set of `source`.
    ///
    /// Targets dropped since the last call lose `source`; added targets
    /// gain it. Unchanged targets are not touched.
    pub fn update(&mut self, source: &CardId, current: &BTreeSet<CardId>) {
        let previous = self.forward.get(source);

        let removed: Vec<CardId> = previous
            .map(|prev| prev.difference(current).cloned().collect())
            .unwrap_or_default();
        let added: Vec<CardId> = match previous {
            Some(prev) => current.difference(prev).cloned().collect(),
            None => current.iter().cloned().collect(),
        };

        for target in removed {
            self.drop_source(&target, source);
        }
        for target in added {
            self.buckets.entry(target).or_default().insert(source.clone());
        }

        if current.is_empty() {
            self.forward.remove(source);
        } else {
            self.forward.insert(source.clone(), current.clone());
        }
    }

    /// The sources currently referencing `target`.
    pub fn sources(&self, target: &CardId) -> Vec<CardId> {
        self.buckets
            .get(target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any source references `target`.
    pub fn is_referenced(&self, target: &CardId) -> bool {
        self.buckets.get(target).is_some_and(|set| !set.is_empty())
    }

    /// Forget `id` entirely, as a source and as a target.
    ///
    /// Called when the card leaves the engine. Entries referencing the
    /// released id as a target are also dropped; if the card comes back the
    /// index is rebuilt from its sources' forward sets.
    pub fn release(&mut self, id: &CardId) {
        if let Some(targets) = self.forward.remove(id) {
            for target in targets {
                self.drop_source(&target, id);
            }
        }
        self.buckets.remove(id);
    }

    fn drop_source(&mut self, target: &CardId, source: &CardId) {
        if let Some(bucket) = self.buckets.get_mut(target) {
            bucket.shift_remove(source);
            if bucket.is_empty() {
                self.buckets.remove(target);
            }
        }
    }
}
