//! In-memory card tree.
//!
//! [`CardBuffer`] is the canonical registry of live cards and the single
//! place that strongly owns them. Parent and ancestor relations are plain
//! ids resolved through the registry at read time — never direct cyclic
//! pointers — so a child does not keep its parent alive and dropping a
//! subtree needs no manual unlinking. Each card owns its ordered children
//! array; child entries are `(fractional_index, id)` pairs kept sorted by
//! the ordered-insertion algorithm.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::ordered::{SiblingRef, ordered_insert, ordered_remove};
use crate::doc::store::CardRecord;
use crate::links::LinkRef;

/// Stable identifier of a card (UUID v4 string).
pub type CardId = String;

/// An in-memory card, mirrored from its durable record.
#[derive(Debug, Clone, Default)]
pub struct Card {
    /// Stable card id.
    pub id: CardId,

    /// Parent card id; a lookup relation, not an ownership edge.
    pub parent_id: Option<CardId>,

    /// Lexicographically ordered sibling position.
    pub fractional_index: String,

    /// Plain rendering of the card's CRDT content.
    pub text: String,

    /// Forward links parsed from `text` (target id → occurrence).
    pub links: IndexMap<CardId, LinkRef>,

    /// Ordered children, sorted by `(fractional_index, id)`.
    pub children: Vec<SiblingRef>,

    /// Whether the card is hidden from normal views.
    pub hidden: bool,

    /// Whether the card's children are collapsed in outline views.
    pub collapsed: bool,

    /// Soft deletion tombstone.
    pub deleted: bool,

    /// Unix timestamp of creation (milliseconds).
    pub created_at: i64,

    /// Unix timestamp of last modification (milliseconds).
    pub updated_at: i64,
}

impl Card {
    /// Build an in-memory card from its durable record.
    ///
    /// Children and links are filled in by the engine as related cards load
    /// and text is parsed.
    pub fn from_record(record: &CardRecord) -> Self {
        Self {
            id: record.id.clone(),
            parent_id: record.parent_id.clone(),
            fractional_index: record.fractional_index.clone(),
            text: record.text.clone(),
            links: IndexMap::new(),
            children: Vec::new(),
            hidden: record.hidden,
            collapsed: record.collapsed,
            deleted: record.deleted,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// The card's entry in its parent's children array.
    pub fn sibling_ref(&self) -> SiblingRef {
        SiblingRef::new(self.fractional_index.clone(), self.id.clone())
    }
}

/// Registry of live cards; the single strong owner.
#[derive(Debug, Default)]
pub struct CardBuffer {
    cards: HashMap<CardId, Card>,
    /// Ordered array of parentless cards (the root sibling scope).
    roots: Vec<SiblingRef>,
}

impl CardBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the buffer holds no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Look up a card by id.
    pub fn get(&self, id: &CardId) -> Option<&Card> {
        self.cards.get(id)
    }

    /// Look up a card mutably.
    ///
    /// Callers changing `parent_id` or `fractional_index` must go through
    /// [`move_card`](Self::move_card) instead so sibling arrays stay sorted.
    pub fn get_mut(&mut self, id: &CardId) -> Option<&mut Card> {
        self.cards.get_mut(id)
    }

    /// Whether a card with this id is registered.
    pub fn contains(&self, id: &CardId) -> bool {
        self.cards.contains_key(id)
    }

    /// Resolve a card's parent through the registry.
    pub fn parent(&self, id: &CardId) -> Option<&Card> {
        let parent_id = self.cards.get(id)?.parent_id.as_ref()?;
        self.cards.get(parent_id)
    }

    /// A card's children, in sibling order.
    pub fn children(&self, id: &CardId) -> Vec<&Card> {
        self.cards
            .get(id)
            .map(|card| {
                card.children
                    .iter()
                    .filter_map(|entry| self.cards.get(&entry.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parentless cards, in sibling order.
    pub fn roots(&self) -> Vec<&Card> {
        self.roots
            .iter()
            .filter_map(|entry| self.cards.get(&entry.id))
            .collect()
    }

    /// The ordered sibling array for a parent scope.
    pub fn sibling_refs(&self, parent_id: Option<&CardId>) -> &[SiblingRef] {
        match parent_id {
            Some(id) => self
                .cards
                .get(id)
                .map(|card| card.children.as_slice())
                .unwrap_or(&[]),
            None => self.roots.as_slice(),
        }
    }

    /// The fractional indices of the neighbors around position `index` in a
    /// sibling scope, excluding `moving` (which is about to be re-spliced).
    pub fn neighbors_at(
        &self,
        parent_id: Option<&CardId>,
        index: usize,
        moving: Option<&CardId>,
    ) -> (Option<String>, Option<String>) {
        let siblings: Vec<&SiblingRef> = self
            .sibling_refs(parent_id)
            .iter()
            .filter(|s| moving != Some(&s.id))
            .collect();

        let index = index.min(siblings.len());
        let lo = index
            .checked_sub(1)
            .and_then(|i| siblings.get(i))
            .map(|s| s.fractional_index.clone());
        let hi = siblings.get(index).map(|s| s.fractional_index.clone());
        (lo, hi)
    }

    /// The chain of ancestor ids for a card, nearest first.
    ///
    /// Cycle-guarded: a corrupt parent chain terminates instead of looping.
    pub fn path(&self, id: &CardId) -> Vec<CardId> {
        let mut ancestors = Vec::new();
        let mut current = self.cards.get(id).and_then(|c| c.parent_id.clone());
        while let Some(ancestor_id) = current {
            if ancestors.contains(&ancestor_id) || &ancestor_id == id {
                log::warn!("Cycle in parent chain at {}", ancestor_id);
                break;
            }
            current = self
                .cards
                .get(&ancestor_id)
                .and_then(|c| c.parent_id.clone());
            ancestors.push(ancestor_id);
        }
        ancestors
    }

    /// Ids of all transitive descendants of a card.
    pub fn subtree_ids(&self, id: &CardId) -> Vec<CardId> {
        let mut out = Vec::new();
        let mut stack: Vec<CardId> = self
            .sibling_refs(Some(id))
            .iter()
            .map(|s| s.id.clone())
            .collect();
        while let Some(next) = stack.pop() {
            stack.extend(
                self.sibling_refs(Some(&next))
                    .iter()
                    .map(|s| s.id.clone()),
            );
            out.push(next);
        }
        out
    }

    /// Register a card and splice it into its parent's ordered array.
    ///
    /// Registering an id that is already present replaces the card's fields
    /// but leaves its position alone. A card referencing an unknown parent
    /// is kept as an orphan in the root scope.
    pub fn insert(&mut self, card: Card) {
        let id = card.id.clone();
        if let Some(existing) = self.cards.get_mut(&id) {
            let children = std::mem::take(&mut existing.children);
            let mut card = card;
            card.children = children;
            *existing = card;
            return;
        }

        let entry = card.sibling_ref();
        let parent_id = card.parent_id.clone();
        self.cards.insert(id.clone(), card);
        self.attach(&parent_id, entry);
    }

    /// Remove a card from the registry, detaching it from its parent.
    ///
    /// The card's children are reattached to the root scope as orphans; the
    /// caller is expected to have released or re-parented them first in the
    /// normal deletion flow.
    pub fn remove(&mut self, id: &CardId) -> Option<Card> {
        let card = self.cards.remove(id)?;
        self.detach(card.parent_id.as_ref(), id);

        for entry in card.children.clone() {
            if let Some(child) = self.cards.get_mut(&entry.id) {
                child.parent_id = None;
                log::debug!("Orphaned {} after removal of {}", entry.id, id);
            }
            ordered_insert(&mut self.roots, entry);
        }
        Some(card)
    }

    /// Re-splice a card under a new parent with a new fractional index.
    ///
    /// Updates the card's fields and both sibling arrays. No-op if the card
    /// is unknown.
    pub fn move_card(
        &mut self,
        id: &CardId,
        new_parent: Option<CardId>,
        new_index: String,
    ) -> bool {
        let Some(card) = self.cards.get(id) else {
            return false;
        };
        let old_parent = card.parent_id.clone();
        self.detach(old_parent.as_ref(), id);

        if let Some(card) = self.cards.get_mut(id) {
            card.parent_id = new_parent.clone();
            card.fractional_index = new_index.clone();
        }
        self.attach(&new_parent, SiblingRef::new(new_index, id.clone()));
        true
    }

    fn attach(&mut self, parent_id: &Option<CardId>, entry: SiblingRef) {
        match parent_id {
            Some(pid) => {
                if let Some(parent) = self.cards.get_mut(pid) {
                    ordered_insert(&mut parent.children, entry);
                } else {
                    log::warn!("Card {} references missing parent {}", entry.id, pid);
                    ordered_insert(&mut self.roots, entry);
                }
            }
            None => {
                ordered_insert(&mut self.roots, entry);
            }
        }
    }

    fn detach(&mut self, parent_id: Option<&CardId>, id: &CardId) {
        let removed = match parent_id {
            Some(pid) => self
                .cards
                .get_mut(pid)
                .map(|parent| ordered_remove(&mut parent.children, id))
                .unwrap_or(false),
            None => ordered_remove(&mut self.roots, id),
        };
        // Orphans live in the root scope regardless of their parent_id.
        if !removed {
            ordered_remove(&mut self.roots, id);
        }
    }
}
