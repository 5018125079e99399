//! Thin wrapper over the yrs merge primitive.
//!
//! Cardtree does not implement a CRDT; it consumes yrs as a black-box
//! commutative/associative merge primitive. Each card owns one Y.Doc with:
//! - a Y.Text `"body"` for the card's content
//! - a Y.Map `"meta"` carrying `parent_id` and `fractional_index`, so that
//!   structural moves ride the same update log as text edits and survive
//!   re-sync.

use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, GetString, Map, MapRef, ReadTxn, StateVector, Text, TextRef, Transact, Update};

use crate::error::{CardtreeError, Result};
use crate::tree::CardId;

/// Name of the Y.Text holding the card body content.
const BODY_TEXT_NAME: &str = "body";

/// Name of the Y.Map holding structural metadata.
const META_MAP_NAME: &str = "meta";

/// Meta map key for the parent card id.
const META_PARENT_KEY: &str = "parent_id";

/// Meta map key for the fractional index.
const META_INDEX_KEY: &str = "fractional_index";

/// The rendered view of a folded update set.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDoc {
    /// Plain rendering of the body text.
    pub text: String,

    /// Parent card id from the meta map, if set.
    pub parent_id: Option<CardId>,

    /// Fractional index from the meta map, if set.
    pub fractional_index: Option<String>,
}

/// Fold a set of binary updates into a fresh Y.Doc.
///
/// Any malformed update aborts the fold; callers keep whatever content they
/// rendered last and retry on the next trigger.
fn fold(updates: &[&[u8]]) -> Result<Doc> {
    let doc = Doc::new();
    {
        let mut txn = doc.transact_mut();
        for data in updates {
            let update = Update::decode_v1(data)
                .map_err(|e| CardtreeError::Crdt(format!("Failed to decode update: {}", e)))?;
            txn.apply_update(update)
                .map_err(|e| CardtreeError::Crdt(format!("Failed to apply update: {}", e)))?;
        }
    }
    Ok(doc)
}

/// Fold a set of updates and render the result.
///
/// Because yrs updates are commutative and associative, the rendered output
/// is independent of the order of `updates`.
pub fn render(updates: &[&[u8]]) -> Result<RenderedDoc> {
    let doc = fold(updates)?;
    let body = doc.get_or_insert_text(BODY_TEXT_NAME);
    let meta = doc.get_or_insert_map(META_MAP_NAME);

    let txn = doc.transact();
    let text = body.get_string(&txn);
    let parent_id = meta
        .get(&txn, META_PARENT_KEY)
        .and_then(|v| v.cast::<String>().ok());
    let fractional_index = meta
        .get(&txn, META_INDEX_KEY)
        .and_then(|v| v.cast::<String>().ok());

    Ok(RenderedDoc {
        text,
        parent_id,
        fractional_index,
    })
}

/// Merge several updates into a single equivalent update.
///
/// The merged payload replays to the same state as applying the inputs
/// individually, in any order.
pub fn merge(updates: &[&[u8]]) -> Result<Vec<u8>> {
    let doc = fold(updates)?;
    let txn = doc.transact();
    Ok(txn.encode_state_as_update_v1(&StateVector::default()))
}

/// An editable card document.
///
/// `CardDoc` produces incremental update payloads for local edits; it never
/// writes storage itself. The engine appends the payloads to the update log.
pub struct CardDoc {
    doc: Doc,
    body: TextRef,
    meta: MapRef,
}

impl CardDoc {
    /// Create a new empty card document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let body = doc.get_or_insert_text(BODY_TEXT_NAME);
        let meta = doc.get_or_insert_map(META_MAP_NAME);
        Self { doc, body, meta }
    }

    /// Reconstruct a card document from its update log.
    pub fn from_updates(updates: &[&[u8]]) -> Result<Self> {
        let doc = fold(updates)?;
        let body = doc.get_or_insert_text(BODY_TEXT_NAME);
        let meta = doc.get_or_insert_map(META_MAP_NAME);
        Ok(Self { doc, body, meta })
    }

    /// Get the current body content.
    pub fn body(&self) -> String {
        let txn = self.doc.transact();
        self.body.get_string(&txn)
    }

    /// Set the body content, using minimal diff operations.
    ///
    /// Instead of delete-all + insert-all (which breaks CRDT sync), this
    /// calculates the minimal diff between current and new content, applying
    /// only the necessary insert/delete operations so that operation IDs are
    /// preserved where content hasn't changed.
    ///
    /// Returns the incremental update payload, or `None` if the content was
    /// already identical.
    pub fn set_body(&self, content: &str) -> Option<Vec<u8>> {
        let (current, sv_before) = {
            let txn = self.doc.transact();
            (self.body.get_string(&txn), txn.state_vector())
        };

        if current == content {
            return None;
        }

        let current_chars: Vec<char> = current.chars().collect();
        let new_chars: Vec<char> = content.chars().collect();

        let common_prefix = current_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let remaining_current = current_chars.len() - common_prefix;
        let remaining_new = new_chars.len() - common_prefix;
        let common_suffix = current_chars[common_prefix..]
            .iter()
            .rev()
            .zip(new_chars[common_prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_current.min(remaining_new))
            .count();

        let delete_start = common_prefix;
        let delete_end = current_chars.len() - common_suffix;
        let insert_start = common_prefix;
        let insert_end = new_chars.len() - common_suffix;

        {
            let mut txn = self.doc.transact_mut();

            if delete_end > delete_start {
                let delete_len = (delete_end - delete_start) as u32;
                self.body
                    .remove_range(&mut txn, delete_start as u32, delete_len);
            }

            if insert_end > insert_start {
                let insert_text: String = new_chars[insert_start..insert_end].iter().collect();
                self.body
                    .insert(&mut txn, delete_start as u32, &insert_text);
            }
        }

        self.encode_since(&sv_before)
    }

    /// Insert text at a character position, returning the update payload.
    pub fn insert_at(&self, index: u32, text: &str) -> Option<Vec<u8>> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc.transact_mut();
            self.body.insert(&mut txn, index, text);
        }

        self.encode_since(&sv_before)
    }

    /// Get the parent id from the meta map.
    pub fn parent_id(&self) -> Option<CardId> {
        let txn = self.doc.transact();
        self.meta
            .get(&txn, META_PARENT_KEY)
            .and_then(|v| v.cast::<String>().ok())
    }

    /// Get the fractional index from the meta map.
    pub fn fractional_index(&self) -> Option<String> {
        let txn = self.doc.transact();
        self.meta
            .get(&txn, META_INDEX_KEY)
            .and_then(|v| v.cast::<String>().ok())
    }

    /// Record a structural position in the meta map.
    ///
    /// Returns the incremental update payload carrying the new
    /// `parent_id`/`fractional_index` so the move survives re-sync.
    pub fn set_position(
        &self,
        parent_id: Option<&CardId>,
        fractional_index: &str,
    ) -> Option<Vec<u8>> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc.transact_mut();
            match parent_id {
                Some(id) => self.meta.insert(&mut txn, META_PARENT_KEY, id.as_str()),
                None => self.meta.insert(&mut txn, META_PARENT_KEY, Any::Null),
            };
            self.meta
                .insert(&mut txn, META_INDEX_KEY, fractional_index);
        }

        self.encode_since(&sv_before)
    }

    /// Encode the full document state as a single update.
    ///
    /// Used to seed a new card's log and to build checkpoint payloads.
    pub fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn encode_since(&self, sv_before: &StateVector) -> Option<Vec<u8>> {
        let update = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(sv_before)
        };
        if update.is_empty() { None } else { Some(update) }
    }
}

impl Default for CardDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CardDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDoc")
            .field("body_len", &self.body().len())
            .finish_non_exhaustive()
    }
}
