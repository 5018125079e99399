//! Durable update log: CRDT folding, storage, materialization, compaction.

pub mod compact;
pub mod materialize;
pub mod memory;
pub mod merge;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub mod sqlite;
pub mod store;

pub use compact::Compactor;
pub use materialize::{Materialized, Materializer};
pub use memory::MemoryStore;
pub use merge::{CardDoc, RenderedDoc};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use sqlite::SqliteStore;
pub use store::{CardRecord, ChangeCallback, StoreChange, UpdateRecord, UpdateStore};
