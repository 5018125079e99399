//! Ordered in-memory card tree.

pub mod card;
pub mod fractional;
pub mod ordered;

pub use card::{Card, CardBuffer, CardId};
pub use fractional::IndexGen;
pub use ordered::SiblingRef;
