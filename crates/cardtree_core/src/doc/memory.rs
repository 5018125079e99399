//! In-memory store implementation for testing.
//!
//! This provides a simple in-memory implementation of [`UpdateStore`]
//! for use in unit tests and development. Its compaction primitives apply
//! all mutations under one lock acquisition, mirroring the transactional
//! guarantee of the SQLite backend.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::store::{CardRecord, ChangeCallback, StoreChange, UpdateRecord, UpdateStore};
use crate::error::{CardtreeError, Result};
use crate::tree::CardId;

/// In-memory card/update-log store for testing.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    subscribers: RwLock<Vec<ChangeCallback>>,
}

#[derive(Default)]
struct Inner {
    updates: HashMap<CardId, Vec<UpdateRecord>>,
    cards: HashMap<CardId, CardRecord>,
    next_id: i64,
}

impl Inner {
    fn next_update_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire a change notification after the inner lock is released.
    fn notify(&self, change: StoreChange) {
        let subscribers = self.subscribers.read().unwrap();
        for callback in subscribers.iter() {
            callback(&change);
        }
    }

    fn sorted_clone(records: &[UpdateRecord]) -> Vec<UpdateRecord> {
        let mut out = records.to_vec();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        out
    }
}

impl UpdateStore for MemoryStore {
    fn append_update(&self, doc_id: &CardId, data: &[u8], checkpoint: bool) -> Result<i64> {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_update_id();
            inner.updates.entry(doc_id.clone()).or_default().push(UpdateRecord {
                id,
                doc_id: doc_id.clone(),
                data: data.to_vec(),
                checkpoint,
                created_at: chrono::Utc::now().timestamp_millis(),
            });
            id
        };

        self.notify(StoreChange::Updates {
            record_ids: vec![id],
        });
        Ok(id)
    }

    fn get_updates(&self, doc_id: &CardId) -> Result<Vec<UpdateRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .updates
            .get(doc_id)
            .map(|u| Self::sorted_clone(u))
            .unwrap_or_default())
    }

    fn get_checkpoints(&self, doc_id: &CardId) -> Result<Vec<UpdateRecord>> {
        Ok(self
            .get_updates(doc_id)?
            .into_iter()
            .filter(|u| u.checkpoint)
            .collect())
    }

    fn get_oldest_plain(
        &self,
        doc_id: &CardId,
        max_created_at: Option<i64>,
        limit: usize,
    ) -> Result<Vec<UpdateRecord>> {
        Ok(self
            .get_updates(doc_id)?
            .into_iter()
            .filter(|u| !u.checkpoint)
            .filter(|u| max_created_at.is_none_or(|max| u.created_at <= max))
            .take(limit)
            .collect())
    }

    fn count_updates(&self, doc_id: &CardId) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.updates.get(doc_id).map(|u| u.len()).unwrap_or(0))
    }

    fn resolve_docs(&self, record_ids: &[i64]) -> Result<Vec<CardId>> {
        let inner = self.inner.lock().unwrap();
        let mut docs: Vec<CardId> = Vec::new();
        for (doc_id, records) in &inner.updates {
            if records.iter().any(|r| record_ids.contains(&r.id)) && !docs.contains(doc_id) {
                docs.push(doc_id.clone());
            }
        }
        Ok(docs)
    }

    fn rewrite_checkpoint(
        &self,
        checkpoint_id: i64,
        merged: &[u8],
        consumed: &[i64],
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let records = inner
                .updates
                .values_mut()
                .find(|records| records.iter().any(|r| r.id == checkpoint_id))
                .ok_or_else(|| {
                    CardtreeError::Store(format!("no checkpoint record {}", checkpoint_id))
                })?;

            // Single lock acquisition stands in for the SQL transaction:
            // overwrite and delete are never observed separately.
            records.retain(|r| !consumed.contains(&r.id));
            let checkpoint = records
                .iter_mut()
                .find(|r| r.id == checkpoint_id)
                .ok_or_else(|| {
                    CardtreeError::Store(format!("checkpoint {} was consumed", checkpoint_id))
                })?;
            checkpoint.data = merged.to_vec();
        }

        self.notify(StoreChange::Updates {
            record_ids: vec![checkpoint_id],
        });
        Ok(())
    }

    fn replace_with_merged(
        &self,
        doc_id: &CardId,
        merged: &[u8],
        consumed: &[i64],
    ) -> Result<i64> {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_update_id();
            let records = inner.updates.entry(doc_id.clone()).or_default();
            // Reuse the oldest consumed record's timestamp so the merged
            // record keeps its place in compaction order.
            let created_at = records
                .iter()
                .filter(|r| consumed.contains(&r.id))
                .map(|r| r.created_at)
                .min()
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            records.retain(|r| !consumed.contains(&r.id));
            records.push(UpdateRecord {
                id,
                doc_id: doc_id.clone(),
                data: merged.to_vec(),
                checkpoint: false,
                created_at,
            });
            id
        };

        self.notify(StoreChange::Updates {
            record_ids: vec![id],
        });
        Ok(id)
    }

    fn get_card(&self, id: &CardId) -> Result<Option<CardRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.cards.get(id).cloned())
    }

    fn put_card(&self, record: &CardRecord) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.cards.insert(record.id.clone(), record.clone());
        }
        self.notify(StoreChange::Cards {
            card_ids: vec![record.id.clone()],
        });
        Ok(())
    }

    fn list_cards(&self) -> Result<Vec<CardRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut cards: Vec<CardRecord> = inner.cards.values().cloned().collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(cards)
    }

    fn subscribe(&self, callback: ChangeCallback) {
        self.subscribers.write().unwrap().push(callback);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("MemoryStore")
            .field("docs", &inner.updates.len())
            .field("cards", &inner.cards.len())
            .finish_non_exhaustive()
    }
}
