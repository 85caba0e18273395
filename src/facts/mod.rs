//! Fact analysis: triple extraction from sections and diffs, and the
//! per-root index that detects duplicates and conflicts before writes.

pub mod extract;
pub mod index;
