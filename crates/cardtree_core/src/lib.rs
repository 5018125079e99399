//! Core library for cardtree: a locally-replicated, conflict-free card tree.
//!
//! Cards are small documents arranged in an ordered tree. Every edit —
//! textual or structural — is an opaque CRDT update appended to a durable
//! per-card log; concurrent edits from multiple processes merge without
//! central coordination. On top of the log sit two coupled subsystems:
//!
//! - [`doc`]: materialization (folding a card's update set into rendered
//!   content, gated by a digest of the set) and compaction (bounding log
//!   growth while preserving replay fidelity and checkpoint boundaries).
//! - [`tree`] and [`index`]: a fractional-index-ordered in-memory tree plus
//!   inverted indices (backlinks, descendants, duplicate-text conflicts)
//!   that stay correct as cards are created, reparented, and released.
//!
//! [`CardEngine`] is the façade wiring it all together over an
//! [`UpdateStore`] backend ([`MemoryStore`] for tests, [`SqliteStore`]
//! behind the default-on `sqlite` feature).

#![warn(missing_docs)]

pub mod config;
pub mod doc;
pub mod engine;
pub mod error;
pub mod index;
pub mod links;
pub mod tree;

pub use config::{ConflictPolicy, EngineConfig};
pub use doc::{
    CardDoc, CardRecord, Compactor, Materialized, Materializer, MemoryStore, RenderedDoc,
    StoreChange, UpdateRecord, UpdateStore,
};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use doc::SqliteStore;
pub use engine::CardEngine;
pub use error::{CardtreeError, OpResult, Result};
pub use index::{ConflictChecker, InvertedIndex};
pub use links::{LinkRef, parse_links};
pub use tree::{Card, CardBuffer, CardId, IndexGen, SiblingRef};
