//! Derived indices over the card tree.

pub mod conflict;
pub mod inverted;

pub use conflict::ConflictChecker;
pub use inverted::InvertedIndex;
