//! Common error types for cardtree operations.

use serde::Serialize;
use thiserror::Error;

use crate::tree::CardId;

/// Unified error type for cardtree operations
#[derive(Debug, Error)]
pub enum CardtreeError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    // CRDT errors (decode/apply failures from the merge primitive)
    #[error("CRDT error: {0}")]
    Crdt(String),

    // Tree errors
    #[error("No card with id '{0}'")]
    CardNotFound(CardId),

    #[error("Card '{0}' references missing parent '{1}'")]
    OrphanParent(CardId, CardId),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type alias for cardtree operations
pub type Result<T> = std::result::Result<T, CardtreeError>;

/// A tagged success/failure outcome for operations the user invoked directly.
///
/// Background maintenance (materialization, compaction) never surfaces its
/// failures to callers; user-facing operations (create, move, edit) return
/// this value so callers branch on outcome instead of catching errors.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpResult<T> {
    /// The operation completed.
    Ok {
        /// Operation payload.
        value: T,
    },
    /// The operation failed; the tree is unchanged.
    Failed {
        /// Error kind/variant name
        kind: String,
        /// Human-readable error message
        message: String,
    },
}

impl<T> OpResult<T> {
    /// Wrap a successful outcome.
    pub fn ok(value: T) -> Self {
        OpResult::Ok { value }
    }

    /// Wrap an error as a failed outcome.
    pub fn failed(err: &CardtreeError) -> Self {
        let kind = match err {
            CardtreeError::Io(_) => "Io",
            #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
            CardtreeError::Database(_) => "Database",
            CardtreeError::Store(_) => "Store",
            CardtreeError::Crdt(_) => "Crdt",
            CardtreeError::CardNotFound(_) => "CardNotFound",
            CardtreeError::OrphanParent(..) => "OrphanParent",
            CardtreeError::ConfigParse(_) => "ConfigParse",
        };
        OpResult::Failed {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether the operation completed.
    pub fn is_ok(&self) -> bool {
        matches!(self, OpResult::Ok { .. })
    }

    /// The payload, if the operation completed.
    pub fn value(self) -> Option<T> {
        match self {
            OpResult::Ok { value } => Some(value),
            OpResult::Failed { .. } => None,
        }
    }
}

impl<T> From<Result<T>> for OpResult<T> {
    fn from(res: Result<T>) -> Self {
        match res {
            Ok(value) => OpResult::ok(value),
            Err(e) => OpResult::failed(&e),
        }
    }
}
