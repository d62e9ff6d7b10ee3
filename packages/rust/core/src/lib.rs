//! Sync engine for docsteward.
//!
//! This crate ties change detection, planning, analysis, consolidation,
//! generation, reconciliation, and review into the end-to-end sync
//! pipeline (`pipeline::run_sync`).

pub mod analyze;
pub mod consolidate;
pub mod detect;
pub mod generate;
pub mod lock;
pub mod notify;
pub mod pipeline;
pub mod plan;
pub mod reconcile;
pub mod review;
pub mod settings;
pub mod summarize;
