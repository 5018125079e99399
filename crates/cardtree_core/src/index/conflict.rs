//! Duplicate-text detection within a sibling scope.
//!
//! Cards under one parent are expected to carry distinct texts. The checker
//! buckets card ids by their current text; a bucket with two or more members
//! is a conflict, and every member of that bucket reports as conflicted.
//! Empty texts never conflict — a scope full of blank drafts is normal.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::tree::CardId;

/// Text → id buckets for one sibling scope.
#[derive(Debug, Default)]
pub struct ConflictChecker {
    buckets: IndexMap<String, IndexSet<CardId>>,
    last_text: HashMap<CardId, String>,
}

impl ConflictChecker {
    /// Create an empty checker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current text of a card in this scope.
    ///
    /// Moves the id out of its previous bucket first, so repeated calls with
    /// the same text are no-ops.
    pub fn set(&mut self, id: &CardId, text: &str) {
        if self.last_text.get(id).is_some_and(|prev| prev == text) {
            return;
        }
        self.forget(id);

        if !text.is_empty() {
            self.buckets
                .entry(text.to_string())
                .or_default()
                .insert(id.clone());
        }
        self.last_text.insert(id.clone(), text.to_string());
    }

    /// Whether this card's text collides with a sibling's.
    pub fn is_conflicted(&self, id: &CardId) -> bool {
        self.last_text
            .get(id)
            .and_then(|text| self.buckets.get(text))
            .is_some_and(|bucket| bucket.len() > 1)
    }

    /// All ids sharing the given text.
    pub fn holders(&self, text: &str) -> Vec<CardId> {
        self.buckets
            .get(text)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any text would collide if assigned to a new card.
    pub fn is_taken(&self, text: &str) -> bool {
        self.buckets.get(text).is_some_and(|bucket| !bucket.is_empty())
    }

    /// A variant of `text` not present in this scope, for auto-renaming.
    ///
    /// Tries `text (2)`, `text (3)`, and so on.
    pub fn available_variant(&self, text: &str) -> String {
        if !self.is_taken(text) {
            return text.to_string();
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{} ({})", text, n);
            if !self.is_taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Drop entries for ids no longer in the authoritative sibling list.
    ///
    /// Used when scope membership changed externally (reparenting observed
    /// through the store) rather than through `set`/`release` calls.
    pub fn reconcile(&mut self, current_ids: &[CardId]) {
        let stale: Vec<CardId> = self
            .last_text
            .keys()
            .filter(|id| !current_ids.contains(id))
            .cloned()
            .collect();
        for id in stale {
            self.release(&id);
        }
    }

    /// Remove a card from the scope.
    pub fn release(&mut self, id: &CardId) {
        self.forget(id);
        self.last_text.remove(id);
    }

    /// Whether the scope tracks no cards.
    pub fn is_empty(&self) -> bool {
        self.last_text.is_empty()
    }

    fn forget(&mut self, id: &CardId) {
        if let Some(prev) = self.last_text.get(id) {
            if let Some(bucket) = self.buckets.get_mut(prev) {
                bucket.shift_remove(id);
                if bucket.is_empty() {
                    self.buckets.shift_remove(prev);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_texts_do_not_conflict() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "alpha");
        checker.set(&"b".to_string(), "beta");

        assert!(!checker.is_conflicted(&"a".to_string()));
        assert!(!checker.is_conflicted(&"b".to_string()));
    }

    #[test]
    fn test_duplicate_text_flags_both() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "same");
        checker.set(&"b".to_string(), "same");

        assert!(checker.is_conflicted(&"a".to_string()));
        assert!(checker.is_conflicted(&"b".to_string()));
    }

    #[test]
    fn test_edit_away_resolves_conflict() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "same");
        checker.set(&"b".to_string(), "same");
        checker.set(&"b".to_string(), "different");

        assert!(!checker.is_conflicted(&"a".to_string()));
        assert!(!checker.is_conflicted(&"b".to_string()));
    }

    #[test]
    fn test_release_resolves_conflict() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "same");
        checker.set(&"b".to_string(), "same");
        checker.release(&"b".to_string());

        assert!(!checker.is_conflicted(&"a".to_string()));
        assert!(!checker.is_conflicted(&"b".to_string()));
    }

    #[test]
    fn test_empty_text_never_conflicts() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "");
        checker.set(&"b".to_string(), "");

        assert!(!checker.is_conflicted(&"a".to_string()));
        assert!(!checker.is_conflicted(&"b".to_string()));
    }

    #[test]
    fn test_resetting_same_text_is_stable() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "text");
        checker.set(&"a".to_string(), "text");

        assert!(!checker.is_conflicted(&"a".to_string()));
        assert_eq!(checker.holders("text"), vec!["a".to_string()]);
    }

    #[test]
    fn test_available_variant() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "note");
        checker.set(&"b".to_string(), "note (2)");

        assert_eq!(checker.available_variant("note"), "note (3)");
        assert_eq!(checker.available_variant("fresh"), "fresh");
    }

    #[test]
    fn test_reconcile_drops_departed_ids() {
        let mut checker = ConflictChecker::new();
        checker.set(&"a".to_string(), "same");
        checker.set(&"b".to_string(), "same");

        checker.reconcile(&["a".to_string()]);

        assert!(!checker.is_conflicted(&"a".to_string()));
        assert_eq!(checker.holders("same"), vec!["a".to_string()]);
    }

    #[test]
    fn test_sequence_a_a_b() {
        let mut checker = ConflictChecker::new();
        checker.set(&"1".to_string(), "a");
        checker.set(&"2".to_string(), "a");
        assert!(checker.is_conflicted(&"1".to_string()));

        checker.set(&"2".to_string(), "b");
        assert!(!checker.is_conflicted(&"1".to_string()));
        assert!(!checker.is_conflicted(&"2".to_string()));
    }
}
