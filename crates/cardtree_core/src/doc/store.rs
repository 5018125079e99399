//! Storage abstraction for the durable update log and card records.
//!
//! This module defines the [`UpdateStore`] trait which abstracts over
//! storage backends (SQLite, in-memory) for persisting card records and
//! their append-only CRDT update logs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tree::CardId;

/// A CRDT update record, stored for replay and compaction.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    /// Store-assigned monotonic identifier.
    pub id: i64,

    /// Id of the card this update belongs to.
    pub doc_id: CardId,

    /// Opaque binary yrs update data.
    pub data: Vec<u8>,

    /// Whether this record is a compaction boundary.
    pub checkpoint: bool,

    /// Unix timestamp when this update was created (milliseconds).
    pub created_at: i64,
}

/// The durable shape of a card.
///
/// `text`, `parent_id` and `fractional_index` are derived from the card's
/// update log by materialization; `last_hash` gates redundant re-renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    /// Stable card id.
    pub id: CardId,

    /// Parent card id, or `None` for root cards.
    pub parent_id: Option<CardId>,

    /// Lexicographically ordered sibling position.
    pub fractional_index: String,

    /// Plain rendering of the card's CRDT content.
    #[serde(default)]
    pub text: String,

    /// Whether the card is hidden from normal views.
    pub hidden: bool,

    /// Whether the card's children are collapsed in outline views.
    pub collapsed: bool,

    /// Soft deletion tombstone.
    pub deleted: bool,

    /// Digest of the update-id set last folded into `text`.
    pub last_hash: Option<String>,

    /// Unix timestamp of creation (milliseconds).
    pub created_at: i64,

    /// Unix timestamp of last modification (milliseconds).
    pub updated_at: i64,
}

impl CardRecord {
    /// Create a fresh record for a new card.
    pub fn new(id: CardId, parent_id: Option<CardId>, fractional_index: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            parent_id,
            fractional_index,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }
}

/// A change notification fired after a committed write.
///
/// Carries the changed collection and, where available, the changed record
/// ids, so handlers can scope their work instead of scanning globally.
#[derive(Debug, Clone)]
pub enum StoreChange {
    /// Update records were appended or rewritten.
    Updates {
        /// Ids of the changed update records.
        record_ids: Vec<i64>,
    },
    /// Card records were written.
    Cards {
        /// Ids of the changed cards.
        card_ids: Vec<CardId>,
    },
}

/// Callback type for change subscriptions.
pub type ChangeCallback = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Trait for durable card/update-log storage backends.
///
/// # Storage Model
///
/// The store maintains two collections:
/// 1. **Card records**: the queryable shape of each card
/// 2. **Update log**: append-only incremental updates per card
///
/// The log is intentionally allowed to grow until compacted; `append_update`
/// never rejects on size.
///
/// # Atomicity
///
/// [`rewrite_checkpoint`] and [`replace_with_merged`] are the compaction
/// primitives and MUST execute as a single all-or-nothing unit: a partial
/// delete-without-insert (or vice versa) would lose replay data. This is the
/// one place the core depends on the store's transactional guarantee.
///
/// [`rewrite_checkpoint`]: UpdateStore::rewrite_checkpoint
/// [`replace_with_merged`]: UpdateStore::replace_with_merged
pub trait UpdateStore: Send + Sync {
    /// Append one update to a card's log.
    ///
    /// Returns the id of the newly created record.
    fn append_update(&self, doc_id: &CardId, data: &[u8], checkpoint: bool) -> Result<i64>;

    /// Get all update records for a card, ordered by `(created_at, id)`.
    fn get_updates(&self, doc_id: &CardId) -> Result<Vec<UpdateRecord>>;

    /// Get all checkpoint records for a card, ordered by `(created_at, id)`
    /// ascending.
    fn get_checkpoints(&self, doc_id: &CardId) -> Result<Vec<UpdateRecord>>;

    /// Get the oldest non-checkpoint records for a card, optionally bounded
    /// by `created_at <= max_created_at`, limited to `limit` records.
    fn get_oldest_plain(
        &self,
        doc_id: &CardId,
        max_created_at: Option<i64>,
        limit: usize,
    ) -> Result<Vec<UpdateRecord>>;

    /// Count the update records for a card.
    fn count_updates(&self, doc_id: &CardId) -> Result<usize>;

    /// Resolve changed update-record ids to the cards they belong to.
    ///
    /// Used by change handlers to scope materialization to affected docs.
    fn resolve_docs(&self, record_ids: &[i64]) -> Result<Vec<CardId>>;

    /// Atomically overwrite a checkpoint's data with merged bytes and delete
    /// the consumed non-checkpoint records.
    ///
    /// The checkpoint keeps its id, preserving its identity as a compaction
    /// boundary while the record count shrinks.
    fn rewrite_checkpoint(
        &self,
        checkpoint_id: i64,
        merged: &[u8],
        consumed: &[i64],
    ) -> Result<()>;

    /// Atomically delete the consumed records and insert one merged
    /// non-checkpoint record in their place.
    ///
    /// Returns the id of the inserted record.
    fn replace_with_merged(&self, doc_id: &CardId, merged: &[u8], consumed: &[i64])
    -> Result<i64>;

    /// Get a card record by id.
    fn get_card(&self, id: &CardId) -> Result<Option<CardRecord>>;

    /// Insert or replace a card record.
    ///
    /// Also used by materialization to write `{text, hash, updated_at}` back;
    /// the record is created if it does not exist yet (updates may arrive for
    /// a card before its record does).
    fn put_card(&self, record: &CardRecord) -> Result<()>;

    /// List all card records.
    fn list_cards(&self) -> Result<Vec<CardRecord>>;

    /// Subscribe to change notifications.
    ///
    /// The callback fires after each committed write, on the writing thread.
    fn subscribe(&self, callback: ChangeCallback);
}
