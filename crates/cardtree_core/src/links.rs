//! Card link parsing.
//!
//! Card bodies reference other cards with wiki-style `[[card-id]]` spans.
//! This module extracts those references into the forward `links` map that
//! the backlink index is diffed from.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::tree::CardId;

/// Descriptor for one forward link occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    /// Byte offset of the opening `[[` in the rendered text.
    pub offset: usize,
}

/// Parse `[[target]]` references out of rendered body text.
///
/// Targets are trimmed; empty targets are skipped. When the same target is
/// referenced more than once, the first occurrence wins.
pub fn parse_links(text: &str) -> IndexMap<CardId, LinkRef> {
    let mut links = IndexMap::new();
    let mut rest = text;
    let mut base = 0;

    while let Some(open) = rest.find("[[") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("]]") else {
            break;
        };

        let target = after_open[..close].trim();
        if !target.is_empty() {
            links
                .entry(target.to_string())
                .or_insert(LinkRef { offset: base + open });
        }

        let consumed = open + 2 + close + 2;
        base += consumed;
        rest = &rest[consumed..];
    }

    links
}
