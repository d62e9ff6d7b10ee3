//! Source repository access for documentation sync.

mod client;
mod repo;

pub use client::{DEFAULT_FETCH_CONCURRENCY, EntryKind, SourceClient, TreeEntry};
pub use repo::{DEFAULT_BRANCH, RepoRef};
