//! Markdown normalization and three-way merging for document content.
//!
//! Everything here is pure text-in, text-out. Callers normalize all three
//! inputs before merging so that formatting drift (line endings, list
//! markers, wrapping) never shows up as a content conflict.

mod diff3;
mod normalize;

pub use diff3::{MergeOutcome, three_way_merge};
pub use normalize::normalize;
