//! Configuration types for the card engine.
//!
//! This module provides the [`EngineConfig`] struct which stores tuning knobs
//! for compaction scheduling and the duplicate-text conflict policy.
//! Configuration is persisted as TOML.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Policy applied when two sibling cards carry identical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave both cards alone; `has_conflict` reports true for each of them.
    #[default]
    Flag,

    /// On create-time collisions, append a ` (n)` suffix to the new card's
    /// text so siblings stay unique. Existing cards are never renamed.
    AutoRename,
}

/// Tuning knobs for the card engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of accumulated updates per document before the engine requests
    /// a compaction pass.
    pub compact_threshold: usize,

    /// Number of update records a compaction pass tries to remove.
    pub compact_target: usize,

    /// Duplicate-text policy for sibling cards.
    pub conflict_policy: ConflictPolicy,

    /// Number of random jitter digits appended to generated fractional
    /// indices.
    pub jitter: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compact_threshold: 64,
            compact_target: 1000,
            conflict_policy: ConflictPolicy::default(),
            jitter: 2,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a TOML string.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
