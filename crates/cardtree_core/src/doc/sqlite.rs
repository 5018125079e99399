//! SQLite-backed store implementation.
//!
//! This module provides a persistent backend for card records and the
//! append-only update log. The compaction primitives run their delete +
//! overwrite/insert statements inside a single SQL transaction, which is the
//! atomicity guarantee the compactor depends on.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{Connection, params};

use super::store::{CardRecord, ChangeCallback, StoreChange, UpdateRecord, UpdateStore};
use crate::error::{CardtreeError, Result};
use crate::tree::CardId;

/// SQLite-backed card/update-log store.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    subscribers: RwLock<Vec<ChangeCallback>>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    ///
    /// This will create the necessary tables if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            subscribers: RwLock::new(Vec::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database for testing.
    ///
    /// Data is lost when the store is dropped.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            subscribers: RwLock::new(Vec::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            -- Card records (materialized shape, queryable without replay)
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                fractional_index TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL DEFAULT '',
                hidden INTEGER NOT NULL DEFAULT 0,
                collapsed INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                last_hash TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Append-only update log
            -- Note: no foreign key constraint since updates may arrive
            -- before the card record does
            CREATE TABLE IF NOT EXISTS updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                data BLOB NOT NULL,
                checkpoint INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            -- Index for per-doc replay
            CREATE INDEX IF NOT EXISTS idx_updates_doc_id ON updates(doc_id, id);

            -- Index for compaction queries (oldest plain records first)
            CREATE INDEX IF NOT EXISTS idx_updates_compaction
                ON updates(doc_id, checkpoint, created_at, id);
            "#,
        )?;
        Ok(())
    }

    /// Fire a change notification after the connection lock is released.
    fn notify(&self, change: StoreChange) {
        let subscribers = self.subscribers.read().unwrap();
        for callback in subscribers.iter() {
            callback(&change);
        }
    }

    fn row_to_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<UpdateRecord> {
        Ok(UpdateRecord {
            id: row.get(0)?,
            doc_id: row.get(1)?,
            data: row.get(2)?,
            checkpoint: row.get::<_, i64>(3)? != 0,
            created_at: row.get(4)?,
        })
    }

    fn row_to_card(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRecord> {
        Ok(CardRecord {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            fractional_index: row.get(2)?,
            text: row.get(3)?,
            hidden: row.get::<_, i64>(4)? != 0,
            collapsed: row.get::<_, i64>(5)? != 0,
            deleted: row.get::<_, i64>(6)? != 0,
            last_hash: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl UpdateStore for SqliteStore {
    fn append_update(&self, doc_id: &CardId, data: &[u8], checkpoint: bool) -> Result<i64> {
        let id = {
            let conn = self.conn.lock().unwrap();
            let now = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO updates (doc_id, data, checkpoint, created_at) VALUES (?, ?, ?, ?)",
                params![doc_id, data, checkpoint as i64, now],
            )?;
            conn.last_insert_rowid()
        };

        self.notify(StoreChange::Updates {
            record_ids: vec![id],
        });
        Ok(id)
    }

    fn get_updates(&self, doc_id: &CardId) -> Result<Vec<UpdateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc_id, data, checkpoint, created_at FROM updates
             WHERE doc_id = ?
             ORDER BY created_at ASC, id ASC",
        )?;

        let updates = stmt
            .query_map(params![doc_id], Self::row_to_update)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(updates)
    }

    fn get_checkpoints(&self, doc_id: &CardId) -> Result<Vec<UpdateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc_id, data, checkpoint, created_at FROM updates
             WHERE doc_id = ? AND checkpoint = 1
             ORDER BY created_at ASC, id ASC",
        )?;

        let updates = stmt
            .query_map(params![doc_id], Self::row_to_update)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(updates)
    }

    fn get_oldest_plain(
        &self,
        doc_id: &CardId,
        max_created_at: Option<i64>,
        limit: usize,
    ) -> Result<Vec<UpdateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc_id, data, checkpoint, created_at FROM updates
             WHERE doc_id = ? AND checkpoint = 0 AND created_at <= ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )?;

        let bound = max_created_at.unwrap_or(i64::MAX);
        let updates = stmt
            .query_map(params![doc_id, bound, limit as i64], Self::row_to_update)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(updates)
    }

    fn count_updates(&self, doc_id: &CardId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM updates WHERE doc_id = ?",
            params![doc_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn resolve_docs(&self, record_ids: &[i64]) -> Result<Vec<CardId>> {
        if record_ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; record_ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT doc_id FROM updates WHERE id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(rusqlite::params_from_iter(record_ids.iter()), |row| {
                row.get::<_, CardId>(0)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(docs)
    }

    fn rewrite_checkpoint(
        &self,
        checkpoint_id: i64,
        merged: &[u8],
        consumed: &[i64],
    ) -> Result<()> {
        {
            let mut conn = self.conn.lock().unwrap();

            // Delete + overwrite must commit together; a partial state here
            // would lose replay data.
            let tx = conn.transaction()?;

            for record_id in consumed {
                tx.execute("DELETE FROM updates WHERE id = ?", params![record_id])?;
            }

            let changed = tx.execute(
                "UPDATE updates SET data = ? WHERE id = ? AND checkpoint = 1",
                params![merged, checkpoint_id],
            )?;
            if changed != 1 {
                return Err(CardtreeError::Store(format!(
                    "no checkpoint record {}",
                    checkpoint_id
                )));
            }

            tx.commit()?;
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
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            // Keep the merged record at the consumed records' place in
            // compaction order.
            let created_at: i64 = {
                let placeholders = vec!["?"; consumed.len()].join(", ");
                let sql = format!(
                    "SELECT MIN(created_at) FROM updates WHERE id IN ({})",
                    placeholders
                );
                tx.query_row(&sql, rusqlite::params_from_iter(consumed.iter()), |row| {
                    row.get::<_, Option<i64>>(0)
                })?
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
            };

            for record_id in consumed {
                tx.execute("DELETE FROM updates WHERE id = ?", params![record_id])?;
            }

            tx.execute(
                "INSERT INTO updates (doc_id, data, checkpoint, created_at) VALUES (?, ?, 0, ?)",
                params![doc_id, merged, created_at],
            )?;
            let id = tx.last_insert_rowid();

            tx.commit()?;
            id
        };

        self.notify(StoreChange::Updates {
            record_ids: vec![id],
        });
        Ok(id)
    }

    fn get_card(&self, id: &CardId) -> Result<Option<CardRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, parent_id, fractional_index, text, hidden, collapsed, deleted,
                    last_hash, created_at, updated_at
             FROM cards WHERE id = ?",
            params![id],
            Self::row_to_card,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CardtreeError::Database(e)),
        }
    }

    fn put_card(&self, record: &CardRecord) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO cards
                 (id, parent_id, fractional_index, text, hidden, collapsed, deleted,
                  last_hash, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id,
                    record.parent_id,
                    record.fractional_index,
                    record.text,
                    record.hidden as i64,
                    record.collapsed as i64,
                    record.deleted as i64,
                    record.last_hash,
                    record.created_at,
                    record.updated_at,
                ],
            )?;
        }

        self.notify(StoreChange::Cards {
            card_ids: vec![record.id.clone()],
        });
        Ok(())
    }

    fn list_cards(&self) -> Result<Vec<CardRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, parent_id, fractional_index, text, hidden, collapsed, deleted,
                    last_hash, created_at, updated_at
             FROM cards ORDER BY id",
        )?;
        let cards = stmt
            .query_map([], Self::row_to_card)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(cards)
    }

    fn subscribe(&self, callback: ChangeCallback) {
        self.subscribers.write().unwrap().push(callback);
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_id(s: &str) -> CardId {
        s.to_string()
    }

    #[test]
    fn test_sqlite_append_and_get_updates() {
        let store = SqliteStore::in_memory().unwrap();
        let doc = doc_id("card-1");

        let id1 = store.append_update(&doc, b"update1", false).unwrap();
        let id2 = store.append_update(&doc, b"update2", true).unwrap();

        assert!(id1 < id2);

        let all = store.get_updates(&doc).unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].checkpoint);
        assert!(all[1].checkpoint);
        assert_eq!(all[0].data, b"update1");
    }

    #[test]
    fn test_sqlite_checkpoints_ordered() {
        let store = SqliteStore::in_memory().unwrap();
        let doc = doc_id("card-1");

        store.append_update(&doc, b"a", true).unwrap();
        store.append_update(&doc, b"b", false).unwrap();
        store.append_update(&doc, b"c", true).unwrap();

        let checkpoints = store.get_checkpoints(&doc).unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints[0].id < checkpoints[1].id);
    }

    #[test]
    fn test_sqlite_oldest_plain_limit() {
        let store = SqliteStore::in_memory().unwrap();
        let doc = doc_id("card-1");

        for i in 0..5u8 {
            store.append_update(&doc, &[i], false).unwrap();
        }
        store.append_update(&doc, b"cp", true).unwrap();

        let oldest = store.get_oldest_plain(&doc, None, 3).unwrap();
        assert_eq!(oldest.len(), 3);
        assert_eq!(oldest[0].data, vec![0]);
        assert!(oldest.iter().all(|r| !r.checkpoint));
    }

    #[test]
    fn test_sqlite_resolve_docs() {
        let store = SqliteStore::in_memory().unwrap();
        let a = doc_id("card-a");
        let b = doc_id("card-b");

        let id1 = store.append_update(&a, b"u", false).unwrap();
        store.append_update(&b, b"u", false).unwrap();
        let id3 = store.append_update(&b, b"v", false).unwrap();

        let mut docs = store.resolve_docs(&[id1, id3]).unwrap();
        docs.sort();
        assert_eq!(docs, vec![a, b]);

        assert!(store.resolve_docs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_rewrite_checkpoint() {
        let store = SqliteStore::in_memory().unwrap();
        let doc = doc_id("card-1");

        let plain1 = store.append_update(&doc, b"p1", false).unwrap();
        let plain2 = store.append_update(&doc, b"p2", false).unwrap();
        let checkpoint = store.append_update(&doc, b"cp", true).unwrap();

        store
            .rewrite_checkpoint(checkpoint, b"merged", &[plain1, plain2])
            .unwrap();

        let all = store.get_updates(&doc).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, checkpoint);
        assert_eq!(all[0].data, b"merged");
        assert!(all[0].checkpoint);
    }

    #[test]
    fn test_sqlite_rewrite_missing_checkpoint_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let doc = doc_id("card-1");

        let plain = store.append_update(&doc, b"p", false).unwrap();

        // 999 is not a checkpoint; the transaction must not commit the delete.
        assert!(store.rewrite_checkpoint(999, b"merged", &[plain]).is_err());
        assert_eq!(store.count_updates(&doc).unwrap(), 1);
    }

    #[test]
    fn test_sqlite_replace_with_merged() {
        let store = SqliteStore::in_memory().unwrap();
        let doc = doc_id("card-1");

        let id1 = store.append_update(&doc, b"a", false).unwrap();
        let id2 = store.append_update(&doc, b"b", false).unwrap();
        store.append_update(&doc, b"keep", false).unwrap();

        let merged = store.replace_with_merged(&doc, b"ab", &[id1, id2]).unwrap();

        let all = store.get_updates(&doc).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.id == merged && r.data == b"ab"));
        assert!(all.iter().any(|r| r.data == b"keep"));
    }

    #[test]
    fn test_sqlite_card_round_trip() {
        let store = SqliteStore::in_memory().unwrap();

        let mut record = CardRecord::new(doc_id("card-1"), Some(doc_id("root")), "a5".into());
        record.text = "hello".to_string();
        record.last_hash = Some("abc".to_string());
        store.put_card(&record).unwrap();

        let loaded = store.get_card(&record.id).unwrap().unwrap();
        assert_eq!(loaded, record);

        assert!(store.get_card(&doc_id("missing")).unwrap().is_none());
        assert_eq!(store.list_cards().unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.append_update(&doc_id("card-1"), b"u", false).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_updates(&doc_id("card-1")).unwrap(), 1);
    }
}
