//! The card engine façade.
//!
//! `CardEngine` wires the update log, materializer, compactor, in-memory
//! tree and derived indices together behind one surface. Store change
//! notifications are not handled reactively: callbacks only enqueue the
//! change, and the engine drains the queue synchronously before each
//! operation returns, running materialize → tree re-splice → index diff →
//! conflict diff to completion. Background maintenance failures are logged
//! and retried on the next trigger; only user-invoked operations surface
//! their outcome.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::config::{ConflictPolicy, EngineConfig};
use crate::doc::compact::Compactor;
use crate::doc::materialize::{Materialized, Materializer};
use crate::doc::merge::CardDoc;
use crate::doc::store::{CardRecord, StoreChange, UpdateStore};
use crate::error::{CardtreeError, OpResult, Result};
use crate::index::{ConflictChecker, InvertedIndex};
use crate::links::parse_links;
use crate::tree::{Card, CardBuffer, CardId, IndexGen};

/// Conflict-free card tree over a durable update log.
pub struct CardEngine {
    store: Arc<dyn UpdateStore>,
    config: EngineConfig,
    materializer: Materializer,
    compactor: Compactor,
    index_gen: IndexGen,
    buffer: CardBuffer,
    /// Target card → cards linking to it.
    backlinks: InvertedIndex,
    /// Ancestor card → cards transitively under it.
    descendants: InvertedIndex,
    /// Duplicate-text checkers, one per sibling scope (`None` = root scope).
    conflicts: HashMap<Option<CardId>, ConflictChecker>,
    /// Changes enqueued by store callbacks, drained before operations return.
    pending: Arc<Mutex<VecDeque<StoreChange>>>,
}

impl CardEngine {
    /// Open an engine over a store, loading any existing cards.
    pub fn new(store: Arc<dyn UpdateStore>, config: EngineConfig) -> Result<Self> {
        let pending: Arc<Mutex<VecDeque<StoreChange>>> = Arc::new(Mutex::new(VecDeque::new()));
        let queue = Arc::clone(&pending);
        store.subscribe(Arc::new(move |change| {
            if let Ok(mut q) = queue.lock() {
                q.push_back(change.clone());
            }
        }));

        let mut engine = Self {
            materializer: Materializer::new(Arc::clone(&store)),
            compactor: Compactor::new(Arc::clone(&store)),
            index_gen: IndexGen::new(config.jitter),
            store,
            config,
            buffer: CardBuffer::new(),
            backlinks: InvertedIndex::new(),
            descendants: InvertedIndex::new(),
            conflicts: HashMap::new(),
            pending,
        };
        engine.load()?;
        Ok(engine)
    }

    /// Load every stored card record into the tree and indices.
    ///
    /// Records are inserted parents-first so children splice under their
    /// parent instead of landing in the root scope as temporary orphans.
    fn load(&mut self) -> Result<()> {
        let mut remaining = self.store.list_cards()?;

        while !remaining.is_empty() {
            let (ready, deferred): (Vec<CardRecord>, Vec<CardRecord>) =
                remaining.into_iter().partition(|r| {
                    r.parent_id
                        .as_ref()
                        .is_none_or(|pid| self.buffer.contains(pid))
                });
            if ready.is_empty() {
                // Remaining records reference parents that do not exist;
                // insert them as orphans and stop.
                for record in deferred {
                    self.apply_record(&record);
                }
                break;
            }
            for record in ready {
                self.apply_record(&record);
            }
            remaining = deferred;
        }

        log::debug!("Loaded {} cards", self.buffer.len());
        Ok(())
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- user-facing operations ----

    /// Create a card under `parent_id` (root scope when `None`).
    ///
    /// The card's position rides its own CRDT meta map, so the placement
    /// survives re-sync like any other edit. When no fractional index is
    /// given the card is placed after the scope's last sibling.
    pub fn create_card(
        &mut self,
        parent_id: Option<&CardId>,
        fractional_index: Option<String>,
    ) -> OpResult<CardId> {
        if let Some(pid) = parent_id
            && !self.buffer.contains(pid)
        {
            return OpResult::failed(&CardtreeError::CardNotFound(pid.clone()));
        }

        let index = fractional_index.unwrap_or_else(|| {
            let last = self
                .buffer
                .sibling_refs(parent_id)
                .last()
                .map(|s| s.fractional_index.clone());
            self.index_gen.key_between(last.as_deref(), None)
        });

        let id: CardId = uuid::Uuid::new_v4().to_string();
        let doc = CardDoc::new();
        let Some(seed) = doc.set_position(parent_id, &index) else {
            return OpResult::failed(&CardtreeError::Crdt(
                "Empty position update for new card".to_string(),
            ));
        };

        if let Err(e) = self.store.append_update(&id, &seed, false) {
            return OpResult::failed(&e);
        }
        self.process_pending();
        OpResult::ok(id)
    }

    /// Replace a card's text with a minimal-diff CRDT edit.
    ///
    /// Unchanged regions keep their operation identities, so concurrent
    /// remote edits merge instead of clobbering. Under the auto-rename
    /// conflict policy, a first-time text that collides with a sibling gets
    /// a ` (n)` suffix; existing texts are never renamed.
    pub fn set_text(&mut self, card_id: &CardId, text: &str) -> OpResult<()> {
        let Some(card) = self.buffer.get(card_id) else {
            return OpResult::failed(&CardtreeError::CardNotFound(card_id.clone()));
        };
        let scope = card.parent_id.clone();
        let naming = card.text.is_empty();

        let resolved = match self.config.conflict_policy {
            ConflictPolicy::AutoRename if naming => self
                .conflicts
                .get(&scope)
                .map(|checker| checker.available_variant(text))
                .unwrap_or_else(|| text.to_string()),
            _ => text.to_string(),
        };

        let update = match self.edit_doc(card_id, |doc| doc.set_body(&resolved)) {
            Ok(update) => update,
            Err(e) => return OpResult::failed(&e),
        };
        if let Some(update) = update
            && let Err(e) = self.store.append_update(card_id, &update, false)
        {
            return OpResult::failed(&e);
        }
        self.process_pending();
        OpResult::ok(())
    }

    /// Move a card under a new parent at position `index` among its future
    /// siblings.
    ///
    /// A fresh fractional index is generated strictly between the
    /// destination neighbors and written through the card's CRDT meta map.
    /// Moving a card under itself or one of its descendants fails without
    /// touching the tree.
    pub fn move_to(
        &mut self,
        card_id: &CardId,
        target_parent: Option<&CardId>,
        index: usize,
    ) -> OpResult<()> {
        if !self.buffer.contains(card_id) {
            return OpResult::failed(&CardtreeError::CardNotFound(card_id.clone()));
        }
        if let Some(pid) = target_parent {
            if !self.buffer.contains(pid) {
                return OpResult::failed(&CardtreeError::CardNotFound(pid.clone()));
            }
            if pid == card_id || self.buffer.path(pid).contains(card_id) {
                return OpResult::failed(&CardtreeError::Store(format!(
                    "Moving '{}' under '{}' would create a cycle",
                    card_id, pid
                )));
            }
        }

        let (lo, hi) = self
            .buffer
            .neighbors_at(target_parent, index, Some(card_id));
        let fresh = self.index_gen.key_between(lo.as_deref(), hi.as_deref());

        let update = match self.edit_doc(card_id, |doc| doc.set_position(target_parent, &fresh)) {
            Ok(update) => update,
            Err(e) => return OpResult::failed(&e),
        };
        if let Some(update) = update
            && let Err(e) = self.store.append_update(card_id, &update, false)
        {
            return OpResult::failed(&e);
        }
        self.process_pending();
        OpResult::ok(())
    }

    /// Tombstone a card.
    ///
    /// The card stays resolvable (and indexed) until [`release`] reclaims
    /// it; a live id must keep working even when deletion has been observed.
    ///
    /// [`release`]: Self::release
    pub fn delete_card(&mut self, card_id: &CardId) -> OpResult<()> {
        let record = match self.store.get_card(card_id) {
            Ok(Some(record)) => record,
            Ok(None) => return OpResult::failed(&CardtreeError::CardNotFound(card_id.clone())),
            Err(e) => return OpResult::failed(&e),
        };

        let mut record = record;
        record.deleted = true;
        record.updated_at = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.store.put_card(&record) {
            return OpResult::failed(&e);
        }
        self.process_pending();
        OpResult::ok(())
    }

    /// Reclaim a card, pruning every index entry it contributed.
    ///
    /// Explicit and idempotent; correctness never depends on drop timing.
    pub fn release(&mut self, card_id: &CardId) {
        self.backlinks.release(card_id);
        self.descendants.release(card_id);

        let scope = self.buffer.get(card_id).map(|c| c.parent_id.clone());
        if let Some(scope) = scope {
            self.scope_release(&scope, card_id);
        }
        // The released card no longer forms a sibling scope of its own.
        self.conflicts.remove(&Some(card_id.clone()));

        // Removing the card re-roots its children; their ancestor chains
        // (and the descendants index built from them) change with it, and
        // the former children become root-scope siblings for conflict
        // purposes.
        let children: Vec<CardId> = self
            .buffer
            .sibling_refs(Some(card_id))
            .iter()
            .map(|s| s.id.clone())
            .collect();
        let subtree = self.buffer.subtree_ids(card_id);
        self.buffer.remove(card_id);
        for descendant in subtree {
            self.refresh_ancestry(&descendant);
        }
        for child in children {
            let text = self
                .buffer
                .get(&child)
                .map(|c| c.text.clone())
                .unwrap_or_default();
            self.conflicts.entry(None).or_default().set(&child, &text);
        }
    }

    // ---- log maintenance ----

    /// Append one opaque update to a card's log.
    ///
    /// This is the remote-sync ingestion point; materialization and index
    /// maintenance run before the call returns.
    pub fn append_update(&mut self, doc_id: &CardId, data: &[u8], checkpoint: bool) -> Result<i64> {
        let id = self.store.append_update(doc_id, data, checkpoint)?;
        self.process_pending();
        Ok(id)
    }

    /// Snapshot a card's full state as a checkpoint record.
    ///
    /// Checkpoints are compaction boundaries: later passes fold older plain
    /// records into them instead of across them.
    pub fn checkpoint(&mut self, doc_id: &CardId) -> Result<i64> {
        let records = self.store.get_updates(doc_id)?;
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.data.as_slice()).collect();
        let doc = CardDoc::from_updates(&payloads)?;
        let id = self
            .store
            .append_update(doc_id, &doc.encode_full_state(), true)?;
        self.process_pending();
        Ok(id)
    }

    /// Re-render a card from its update log.
    ///
    /// Hash-gated and idempotent; safe to call speculatively.
    pub fn materialize(&mut self, doc_id: &CardId) -> Result<()> {
        if let Materialized::Written(record) = self.materializer.materialize(doc_id)? {
            self.apply_record(&record);
        }
        self.process_pending();
        Ok(())
    }

    /// Compact a card's update log, removing up to `target_length` records.
    pub fn compact(&mut self, doc_id: &CardId, target_length: usize) -> Result<()> {
        self.compactor.merge_card_updates(doc_id, target_length)?;
        self.process_pending();
        Ok(())
    }

    // ---- queries ----

    /// Look up a card by id.
    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.buffer.get(id)
    }

    /// A card's children, in sibling order.
    pub fn children(&self, id: &CardId) -> Vec<&Card> {
        self.buffer.children(id)
    }

    /// Root-scope cards, in sibling order.
    pub fn roots(&self) -> Vec<&Card> {
        self.buffer.roots()
    }

    /// Cards whose text links to `target`.
    pub fn get_backlinks(&self, target: &CardId) -> Vec<CardId> {
        self.backlinks.sources(target)
    }

    /// Cards transitively under `ancestor`.
    pub fn get_descendants(&self, ancestor: &CardId) -> Vec<CardId> {
        self.descendants.sources(ancestor)
    }

    /// Whether a card's text collides with a sibling's.
    pub fn has_conflict(&self, card_id: &CardId) -> bool {
        self.buffer
            .get(card_id)
            .and_then(|card| self.conflicts.get(&card.parent_id))
            .is_some_and(|checker| checker.is_conflicted(card_id))
    }

    // ---- change handling ----

    /// Drain the pending change queue, running each change to completion.
    fn process_pending(&mut self) {
        loop {
            let next = self
                .pending
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front());
            let Some(change) = next else {
                break;
            };
            self.handle_change(&change);
        }
    }

    fn handle_change(&mut self, change: &StoreChange) {
        match change {
            StoreChange::Updates { record_ids } => {
                // Scoped to the owning docs; never a global rescan.
                match self.materializer.materialize_changed(record_ids) {
                    Ok(results) => {
                        for result in results {
                            if let Materialized::Written(record) = result {
                                self.apply_record(&record);
                                self.maybe_request_compaction(&record.id);
                            }
                        }
                    }
                    Err(e) => log::warn!("Deferred materialization after store error: {}", e),
                }
            }
            StoreChange::Cards { card_ids } => {
                for card_id in card_ids {
                    match self.store.get_card(card_id) {
                        Ok(Some(record)) => self.apply_record(&record),
                        Ok(None) => {}
                        Err(e) => log::warn!("Failed to read card {}: {}", card_id, e),
                    }
                }
            }
        }
    }

    /// Request compaction once a doc's log crosses the configured threshold.
    ///
    /// Failures are logged and retried on the next crossing, never surfaced.
    fn maybe_request_compaction(&mut self, doc_id: &CardId) {
        let count = match self.store.count_updates(doc_id) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Failed to count updates for {}: {}", doc_id, e);
                return;
            }
        };
        if count < self.config.compact_threshold {
            return;
        }
        if let Err(e) = self
            .compactor
            .merge_card_updates(doc_id, self.config.compact_target)
        {
            log::warn!("Compaction failed for {}: {}", doc_id, e);
        }
    }

    /// Fold a materialized record into the tree and every derived index.
    fn apply_record(&mut self, record: &CardRecord) {
        let previous = self
            .buffer
            .get(&record.id)
            .map(|card| (card.parent_id.clone(), card.fractional_index.clone()));

        let moved = match &previous {
            None => {
                self.buffer.insert(Card::from_record(record));
                true
            }
            Some((old_parent, old_index)) => {
                let moved =
                    old_parent != &record.parent_id || old_index != &record.fractional_index;
                if moved {
                    self.buffer.move_card(
                        &record.id,
                        record.parent_id.clone(),
                        record.fractional_index.clone(),
                    );
                }
                if let Some(card) = self.buffer.get_mut(&record.id) {
                    card.text = record.text.clone();
                    card.hidden = record.hidden;
                    card.collapsed = record.collapsed;
                    card.deleted = record.deleted;
                    card.created_at = record.created_at;
                    card.updated_at = record.updated_at;
                }
                moved
            }
        };

        // Forward links and the backlink index.
        let links = parse_links(&record.text);
        let targets: BTreeSet<CardId> = links.keys().cloned().collect();
        if let Some(card) = self.buffer.get_mut(&record.id) {
            card.links = links;
        }
        self.backlinks.update(&record.id, &targets);

        // Ancestry: a move changes the path of the whole subtree.
        self.refresh_ancestry(&record.id);
        if moved {
            for descendant in self.buffer.subtree_ids(&record.id) {
                self.refresh_ancestry(&descendant);
            }
        }

        // Conflict scope follows the parent.
        if let Some((old_parent, _)) = previous
            && old_parent != record.parent_id
        {
            self.scope_release(&old_parent, &record.id);
        }
        self.conflicts
            .entry(record.parent_id.clone())
            .or_default()
            .set(&record.id, &record.text);
    }

    fn refresh_ancestry(&mut self, id: &CardId) {
        let path: BTreeSet<CardId> = self.buffer.path(id).into_iter().collect();
        self.descendants.update(id, &path);
    }

    fn scope_release(&mut self, scope: &Option<CardId>, id: &CardId) {
        if let Some(checker) = self.conflicts.get_mut(scope) {
            checker.release(id);
            if checker.is_empty() {
                self.conflicts.remove(scope);
            }
        }
    }

    /// Rebuild a card's document from its log and apply one local edit.
    fn edit_doc<F>(&self, card_id: &CardId, edit: F) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce(&CardDoc) -> Option<Vec<u8>>,
    {
        let records = self.store.get_updates(card_id)?;
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.data.as_slice()).collect();
        let doc = CardDoc::from_updates(&payloads)?;
        Ok(edit(&doc))
    }
}

impl std::fmt::Debug for CardEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardEngine")
            .field("cards", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::memory::MemoryStore;

    fn engine() -> CardEngine {
        let store = Arc::new(MemoryStore::new());
        CardEngine::new(store, EngineConfig::default()).unwrap()
    }

    fn engine_with(config: EngineConfig) -> (Arc<MemoryStore>, CardEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine =
            CardEngine::new(Arc::clone(&store) as Arc<dyn UpdateStore>, config).unwrap();
        (store, engine)
    }

    fn create(engine: &mut CardEngine, parent: Option<&CardId>) -> CardId {
        engine.create_card(parent, None).value().unwrap()
    }

    #[test]
    fn test_create_root_card() {
        let mut engine = engine();
        let id = create(&mut engine, None);

        let card = engine.card(&id).unwrap();
        assert_eq!(card.parent_id, None);
        assert!(!card.fractional_index.is_empty());
        assert_eq!(engine.roots().len(), 1);
    }

    #[test]
    fn test_create_children_in_order() {
        let mut engine = engine();
        let parent = create(&mut engine, None);
        let first = create(&mut engine, Some(&parent));
        let second = create(&mut engine, Some(&parent));

        let ids: Vec<&CardId> = engine.children(&parent).iter().map(|c| &c.id).collect();
        assert_eq!(ids, vec![&first, &second]);
        assert_eq!(engine.get_descendants(&parent).len(), 2);
    }

    #[test]
    fn test_create_under_missing_parent_fails() {
        let mut engine = engine();
        let result = engine.create_card(Some(&"missing".to_string()), None);
        assert!(!result.is_ok());
        assert!(engine.roots().is_empty());
    }

    #[test]
    fn test_set_text_renders_through_log() {
        let mut engine = engine();
        let id = create(&mut engine, None);

        assert!(engine.set_text(&id, "Hello").is_ok());
        assert_eq!(engine.card(&id).unwrap().text, "Hello");
    }

    #[test]
    fn test_backlink_symmetry_under_add_and_remove() {
        let mut engine = engine();
        let source = create(&mut engine, None);
        let target = create(&mut engine, None);

        engine.set_text(&source, &format!("see [[{}]]", target));
        assert_eq!(engine.get_backlinks(&target), vec![source.clone()]);

        engine.set_text(&source, "no more links");
        assert!(engine.get_backlinks(&target).is_empty());
    }

    #[test]
    fn test_reparent_exactly_once_under_target() {
        let mut engine = engine();
        let p1 = create(&mut engine, None);
        let p2 = create(&mut engine, None);
        let child = create(&mut engine, Some(&p1));

        assert!(engine.move_to(&child, Some(&p2), 0).is_ok());

        assert!(engine.children(&p1).is_empty());
        let under_p2: Vec<&CardId> = engine.children(&p2).iter().map(|c| &c.id).collect();
        assert_eq!(under_p2, vec![&child]);

        assert!(engine.get_descendants(&p1).is_empty());
        assert_eq!(engine.get_descendants(&p2), vec![child.clone()]);
    }

    #[test]
    fn test_move_into_position_between_siblings() {
        let mut engine = engine();
        let parent = create(&mut engine, None);
        let a = create(&mut engine, Some(&parent));
        let b = create(&mut engine, Some(&parent));
        let c = create(&mut engine, Some(&parent));

        // Move c between a and b.
        assert!(engine.move_to(&c, Some(&parent), 1).is_ok());
        let ids: Vec<&CardId> = engine.children(&parent).iter().map(|c| &c.id).collect();
        assert_eq!(ids, vec![&a, &c, &b]);
    }

    #[test]
    fn test_move_under_own_descendant_fails() {
        let mut engine = engine();
        let a = create(&mut engine, None);
        let b = create(&mut engine, Some(&a));

        assert!(!engine.move_to(&a, Some(&b), 0).is_ok());
        assert!(!engine.move_to(&a, Some(&a), 0).is_ok());
        assert_eq!(engine.children(&a).len(), 1);
    }

    #[test]
    fn test_move_survives_rematerialization() {
        let (store, mut engine) = engine_with(EngineConfig::default());
        let p1 = create(&mut engine, None);
        let p2 = create(&mut engine, None);
        let child = create(&mut engine, Some(&p1));
        engine.move_to(&child, Some(&p2), 0);

        // Position rides the CRDT log, not just the record.
        engine.compact(&child, 1000).unwrap();
        engine.materialize(&child).unwrap();
        assert_eq!(store.get_card(&child).unwrap().unwrap().parent_id, Some(p2));
    }

    #[test]
    fn test_conflict_detection_a_a_b() {
        let mut engine = engine();
        let parent = create(&mut engine, None);
        let x = create(&mut engine, Some(&parent));
        let y = create(&mut engine, Some(&parent));
        let z = create(&mut engine, Some(&parent));

        engine.set_text(&x, "a");
        engine.set_text(&y, "a");
        engine.set_text(&z, "b");

        assert!(engine.has_conflict(&x));
        assert!(engine.has_conflict(&y));
        assert!(!engine.has_conflict(&z));

        // Mutating one "a" clears the other.
        engine.set_text(&y, "c");
        assert!(!engine.has_conflict(&x));
        assert!(!engine.has_conflict(&y));
    }

    #[test]
    fn test_same_text_under_different_parents_never_conflicts() {
        let mut engine = engine();
        let p1 = create(&mut engine, None);
        let p2 = create(&mut engine, None);
        let a = create(&mut engine, Some(&p1));
        let b = create(&mut engine, Some(&p2));

        engine.set_text(&a, "same");
        engine.set_text(&b, "same");

        assert!(!engine.has_conflict(&a));
        assert!(!engine.has_conflict(&b));
    }

    #[test]
    fn test_reparenting_moves_conflict_scope() {
        let mut engine = engine();
        let p1 = create(&mut engine, None);
        let p2 = create(&mut engine, None);
        let a = create(&mut engine, Some(&p1));
        let b = create(&mut engine, Some(&p2));
        engine.set_text(&a, "same");
        engine.set_text(&b, "same");

        engine.move_to(&b, Some(&p1), 0);

        assert!(engine.has_conflict(&a));
        assert!(engine.has_conflict(&b));
    }

    #[test]
    fn test_auto_rename_policy() {
        let config = EngineConfig {
            conflict_policy: ConflictPolicy::AutoRename,
            ..Default::default()
        };
        let (_store, mut engine) = engine_with(config);
        let parent = create(&mut engine, None);
        let a = create(&mut engine, Some(&parent));
        let b = create(&mut engine, Some(&parent));

        engine.set_text(&a, "note");
        engine.set_text(&b, "note");

        assert_eq!(engine.card(&b).unwrap().text, "note (2)");
        assert!(!engine.has_conflict(&a));
        // Renames apply to first-time texts only.
        engine.set_text(&b, "note");
        assert_eq!(engine.card(&b).unwrap().text, "note");
        assert!(engine.has_conflict(&a));
    }

    #[test]
    fn test_delete_tombstones_then_release_prunes() {
        let mut engine = engine();
        let target = create(&mut engine, None);
        let source = create(&mut engine, None);
        engine.set_text(&source, &format!("[[{}]]", target));

        assert!(engine.delete_card(&source).is_ok());
        // Tombstoned, still resolvable and still indexed.
        assert!(engine.card(&source).unwrap().deleted);
        assert_eq!(engine.get_backlinks(&target), vec![source.clone()]);

        engine.release(&source);
        assert!(engine.card(&source).is_none());
        assert!(engine.get_backlinks(&target).is_empty());
    }

    #[test]
    fn test_release_moves_children_into_root_conflict_scope() {
        let mut engine = engine();
        let parent = create(&mut engine, None);
        let a = create(&mut engine, Some(&parent));
        let b = create(&mut engine, Some(&parent));
        engine.set_text(&a, "same");
        engine.set_text(&b, "same");
        assert!(engine.has_conflict(&a));

        engine.release(&parent);

        // The children are re-rooted and stay in conflict in their new scope.
        assert!(engine.card(&a).unwrap().parent_id.is_none());
        assert!(engine.card(&b).unwrap().parent_id.is_none());
        assert!(engine.has_conflict(&a));
        assert!(engine.has_conflict(&b));

        // And they now collide with pre-existing root-scope texts too.
        let c = create(&mut engine, None);
        engine.set_text(&c, "same");
        assert!(engine.has_conflict(&c));

        engine.set_text(&b, "other");
        engine.set_text(&c, "third");
        assert!(!engine.has_conflict(&a));
        assert!(!engine.has_conflict(&b));
    }

    #[test]
    fn test_descendants_transitive() {
        let mut engine = engine();
        let a = create(&mut engine, None);
        let b = create(&mut engine, Some(&a));
        let c = create(&mut engine, Some(&b));

        let mut descendants = engine.get_descendants(&a);
        descendants.sort();
        let mut expected = vec![b.clone(), c.clone()];
        expected.sort();
        assert_eq!(descendants, expected);
        assert_eq!(engine.get_descendants(&b), vec![c]);
    }

    #[test]
    fn test_threshold_triggers_compaction() {
        let config = EngineConfig {
            compact_threshold: 4,
            ..Default::default()
        };
        let (store, mut engine) = engine_with(config);
        let id = create(&mut engine, None);

        let mut text = String::new();
        for _ in 0..12 {
            text.push('x');
            engine.set_text(&id, &text);
        }

        assert!(store.count_updates(&id).unwrap() < 4);
        assert_eq!(engine.card(&id).unwrap().text, text);
    }

    #[test]
    fn test_checkpoint_snapshot() {
        let mut engine = engine();
        let id = create(&mut engine, None);
        engine.set_text(&id, "content");

        engine.checkpoint(&id).unwrap();

        assert_eq!(engine.store.get_checkpoints(&id).unwrap().len(), 1);
        assert_eq!(engine.card(&id).unwrap().text, "content");
    }

    #[test]
    fn test_engine_reloads_from_store() {
        let store = Arc::new(MemoryStore::new());
        let (parent, child, text) = {
            let mut engine = CardEngine::new(
                Arc::clone(&store) as Arc<dyn UpdateStore>,
                EngineConfig::default(),
            )
            .unwrap();
            let parent = create(&mut engine, None);
            let child = create(&mut engine, Some(&parent));
            engine.set_text(&child, "persisted [[elsewhere]]");
            (parent, child, "persisted [[elsewhere]]".to_string())
        };

        let reloaded = CardEngine::new(
            Arc::clone(&store) as Arc<dyn UpdateStore>,
            EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(reloaded.card(&child).unwrap().text, text);
        let ids: Vec<&CardId> = reloaded.children(&parent).iter().map(|c| &c.id).collect();
        assert_eq!(ids, vec![&child]);
        assert_eq!(
            reloaded.get_backlinks(&"elsewhere".to_string()),
            vec![child.clone()]
        );
        assert_eq!(reloaded.get_descendants(&parent), vec![child]);
    }

    #[test]
    fn test_remote_update_ingestion() {
        let mut engine = engine();
        let id = create(&mut engine, None);

        // A remote replica edits the same doc concurrently.
        let records = engine.store.get_updates(&id).unwrap();
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.data.as_slice()).collect();
        let remote = CardDoc::from_updates(&payloads).unwrap();
        let remote_update = remote.set_body("from remote").unwrap();

        engine.append_update(&id, &remote_update, false).unwrap();
        assert_eq!(engine.card(&id).unwrap().text, "from remote");
    }
}
