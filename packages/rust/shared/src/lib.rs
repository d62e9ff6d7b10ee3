//! Shared types, error model, and configuration for docsteward.
//!
//! This crate is the foundation depended on by all other docsteward crates.
//! It provides:
//! - [`DocstewardError`] — the unified error type
//! - Domain types ([`Document`], [`DocumentVersion`], [`SyncRun`], plans)
//! - Configuration ([`AppConfig`], config loading)
//! - [`with_retry`] — backoff for transient provider failures

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, LlmConfig, SourceConfig, config_dir, config_file_path,
    database_path, init_config, llm_api_key, load_config, load_config_from, source_token,
};
pub use error::{DocstewardError, Result};
pub use retry::with_retry;
pub use types::{
    Category, ChangeSource, Document, DocumentPlan, DocumentVersion, PlanAction, RelatedTable,
    ReviewAnnotation, RunStats, RunStatus, Severity, SourceFileRecord, SyncRun, TableColumn,
    TokenUsage, TriggerType, new_id,
};
