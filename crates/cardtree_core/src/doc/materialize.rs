//! Update-set materialization.
//!
//! Folds a card's update log into rendered content, gated by a digest of the
//! sorted update-id set so unchanged sets are never re-rendered.

use std::sync::Arc;

use super::merge;
use super::store::{CardRecord, UpdateStore};
use crate::error::Result;
use crate::tree::CardId;

/// Compute the digest of an update-id set.
///
/// Ids are sorted ascending before hashing so the digest depends on set
/// membership only, not on arrival order.
pub fn update_set_hash(record_ids: &[i64]) -> String {
    let mut sorted = record_ids.to_vec();
    sorted.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for id in sorted {
        hasher.update(&id.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// The outcome of one materialization pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    /// The update-id set was unchanged; nothing was rendered or written.
    Unchanged,
    /// The card record was re-rendered and written back.
    Written(CardRecord),
}

/// Folds update sets into card content.
pub struct Materializer {
    store: Arc<dyn UpdateStore>,
}

impl Materializer {
    /// Create a materializer over the given store.
    pub fn new(store: Arc<dyn UpdateStore>) -> Self {
        Self { store }
    }

    /// Materialize one card's content from its update log.
    ///
    /// Reads every update record for `doc_id`, digests the sorted id set and
    /// compares it to the card's `last_hash`. If unchanged this is a no-op
    /// (idempotence guarantee). Otherwise every update is folded into a
    /// fresh document, the text is rendered and `{text, hash, updated_at}`
    /// (plus the CRDT-carried position fields) are written back to the card
    /// record.
    ///
    /// A malformed update leaves the previous content in place: the error is
    /// logged, no hash is stored, and the next triggering notification
    /// retries. Only store failures propagate.
    pub fn materialize(&self, doc_id: &CardId) -> Result<Materialized> {
        let records = self.store.get_updates(doc_id)?;
        if records.is_empty() {
            return Ok(Materialized::Unchanged);
        }

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let hash = update_set_hash(&ids);

        let existing = self.store.get_card(doc_id)?;
        if let Some(card) = &existing
            && card.last_hash.as_deref() == Some(hash.as_str())
        {
            return Ok(Materialized::Unchanged);
        }

        let payloads: Vec<&[u8]> = records.iter().map(|r| r.data.as_slice()).collect();
        let rendered = match merge::render(&payloads) {
            Ok(rendered) => rendered,
            Err(e) => {
                log::warn!("Failed to materialize card {}: {}", doc_id, e);
                return Ok(Materialized::Unchanged);
            }
        };

        let now = chrono::Utc::now().timestamp_millis();
        let mut record = existing
            .unwrap_or_else(|| CardRecord::new(doc_id.clone(), None, String::new()));
        record.text = rendered.text;
        if let Some(parent_id) = rendered.parent_id {
            record.parent_id = Some(parent_id);
        } else {
            record.parent_id = None;
        }
        if let Some(index) = rendered.fractional_index {
            record.fractional_index = index;
        }
        record.last_hash = Some(hash);
        record.updated_at = now;

        self.store.put_card(&record)?;
        Ok(Materialized::Written(record))
    }

    /// Resolve changed update-record ids to affected cards and materialize
    /// each of them.
    ///
    /// This is the change-notification entry point: work is scoped to the
    /// docs the changed records belong to, never a global scan.
    pub fn materialize_changed(&self, record_ids: &[i64]) -> Result<Vec<Materialized>> {
        let docs = self.store.resolve_docs(record_ids)?;
        let mut out = Vec::with_capacity(docs.len());
        for doc_id in docs {
            out.push(self.materialize(&doc_id)?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer").finish_non_exhaustive()
    }
}
