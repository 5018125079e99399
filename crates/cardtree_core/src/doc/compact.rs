//! Update-log compaction.
//!
//! Bounds the number of update records per card without losing replay
//! fidelity. Old non-checkpoint records are folded into checkpoint records
//! (preserving each checkpoint's identity as a compaction boundary) and any
//! residual budget is folded into a single merged record. All delete +
//! overwrite/insert steps run under the store's transactional guarantee.

use std::collections::HashSet;
use std::sync::Arc;

use super::merge;
use super::store::{UpdateRecord, UpdateStore};
use crate::error::Result;
use crate::tree::CardId;

/// Merges old update records to bound log growth.
pub struct Compactor {
    store: Arc<dyn UpdateStore>,
    /// Docs with a compaction pass currently in flight. A request for a doc
    /// already in this set is dropped, never interleaved: the pass reads a
    /// snapshot of "oldest N records" that a concurrent pass would
    /// invalidate.
    in_flight: HashSet<CardId>,
}

impl Compactor {
    /// Create a compactor over the given store.
    pub fn new(store: Arc<dyn UpdateStore>) -> Self {
        Self {
            store,
            in_flight: HashSet::new(),
        }
    }

    /// Merge old updates for `doc_id`, removing up to `merge_target_length`
    /// records from the log.
    ///
    /// Checkpoints are walked oldest-first; each absorbs the plain records
    /// created at or before it, bounded by the remaining budget. Whatever
    /// budget survives the checkpoints is folded into one new plain record.
    /// Rendered content is identical before and after for any target length.
    pub fn merge_card_updates(&mut self, doc_id: &CardId, merge_target_length: usize) -> Result<()> {
        if merge_target_length == 0 {
            return Ok(());
        }
        if !self.in_flight.insert(doc_id.clone()) {
            log::debug!("Compaction already in flight for {}, dropping request", doc_id);
            return Ok(());
        }

        let result = self.run(doc_id, merge_target_length);
        self.in_flight.remove(doc_id);
        result
    }

    fn run(&self, doc_id: &CardId, merge_target_length: usize) -> Result<()> {
        let mut merged_count = 0usize;

        let checkpoints = self.store.get_checkpoints(doc_id)?;
        for checkpoint in checkpoints {
            if merged_count >= merge_target_length {
                break;
            }

            let budget = merge_target_length - merged_count;
            let batch =
                self.store
                    .get_oldest_plain(doc_id, Some(checkpoint.created_at), budget)?;
            if batch.is_empty() {
                // Nothing older than this checkpoint; later checkpoints only
                // cover younger records, so stop walking them.
                break;
            }

            let merged = match self.merge_batch(&checkpoint, &batch) {
                Some(merged) => merged,
                None => return Ok(()),
            };

            let consumed: Vec<i64> = batch.iter().map(|r| r.id).collect();
            self.store
                .rewrite_checkpoint(checkpoint.id, &merged, &consumed)?;
            merged_count += batch.len();

            log::debug!(
                "Compacted {} records into checkpoint {} for {}",
                batch.len(),
                checkpoint.id,
                doc_id
            );
        }

        // Residual budget: fold the oldest remaining plain records into a
        // single new plain record.
        if merged_count < merge_target_length {
            let budget = merge_target_length - merged_count;
            let batch = self.store.get_oldest_plain(doc_id, None, budget)?;
            if batch.len() < 2 {
                // Zero records to merge, or one record that would merge into
                // itself; either way there is nothing left to shrink.
                return Ok(());
            }

            let payloads: Vec<&[u8]> = batch.iter().map(|r| r.data.as_slice()).collect();
            let merged = match merge::merge(&payloads) {
                Ok(merged) => merged,
                Err(e) => {
                    log::warn!("Skipping compaction for {}: {}", doc_id, e);
                    return Ok(());
                }
            };

            let consumed: Vec<i64> = batch.iter().map(|r| r.id).collect();
            self.store.replace_with_merged(doc_id, &merged, &consumed)?;

            log::debug!(
                "Compacted {} residual records into one for {}",
                batch.len(),
                doc_id
            );
        }

        Ok(())
    }

    /// Merge a checkpoint's own data with a batch of plain records.
    ///
    /// Returns `None` (after logging) when the payloads are malformed; the
    /// whole pass is abandoned and retried on a later trigger.
    fn merge_batch(&self, checkpoint: &UpdateRecord, batch: &[UpdateRecord]) -> Option<Vec<u8>> {
        let mut payloads: Vec<&[u8]> = Vec::with_capacity(batch.len() + 1);
        payloads.push(checkpoint.data.as_slice());
        payloads.extend(batch.iter().map(|r| r.data.as_slice()));

        match merge::merge(&payloads) {
            Ok(merged) => Some(merged),
            Err(e) => {
                log::warn!(
                    "Skipping checkpoint {} compaction for {}: {}",
                    checkpoint.id,
                    checkpoint.doc_id,
                    e
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
