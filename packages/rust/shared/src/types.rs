//! Core domain types for the documentation sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DocstewardError;

/// Generate a new time-sortable row identifier.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// ChangeSource
// ---------------------------------------------------------------------------

/// Provenance of a document version, recorded in the version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// First AI write of a brand-new document.
    AiGenerated,
    /// AI overwrite of a document with no human edits.
    AiUpdated,
    /// A human saved content through the editing surface.
    HumanEdited,
    /// AI output merged against human edits (clean or conflicting).
    AiMerged,
    /// Unpublished scratch content.
    Draft,
}

impl ChangeSource {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiGenerated => "ai_generated",
            Self::AiUpdated => "ai_updated",
            Self::HumanEdited => "human_edited",
            Self::AiMerged => "ai_merged",
            Self::Draft => "draft",
        }
    }

    /// Whether this version was authored by the sync engine.
    pub fn is_ai(&self) -> bool {
        matches!(self, Self::AiGenerated | Self::AiUpdated | Self::AiMerged)
    }
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeSource {
    type Err = DocstewardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ai_generated" => Ok(Self::AiGenerated),
            "ai_updated" => Ok(Self::AiUpdated),
            "human_edited" => Ok(Self::HumanEdited),
            "ai_merged" => Ok(Self::AiMerged),
            "draft" => Ok(Self::Draft),
            other => Err(DocstewardError::validation(format!(
                "unknown change source: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Documents and versions
// ---------------------------------------------------------------------------

/// A live documentation page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// URL-safe identity, unique and stable once assigned.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Current live markdown content.
    pub content: String,
    /// Owning category, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Latches true on the first human edit and stays true.
    pub has_human_edits: bool,
    /// Set when a merge produced conflicts or annotations warrant attention.
    pub needs_review: bool,
    /// Last time the sync engine wrote this document's content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ai_generated_at: Option<DateTime<Utc>>,
    /// Last time a human saved this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_human_edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot in a document's version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    /// Full content at this version.
    pub content: String,
    pub change_source: ChangeSource,
    /// Human-readable description of what produced this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_summary: Option<String>,
    /// Editor identity for `human_edited` versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A documentation category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Source files
// ---------------------------------------------------------------------------

/// Stored metadata for one included source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFileRecord {
    pub id: String,
    /// Repository-relative path.
    pub path: String,
    /// Content hash from the provider's tree listing.
    pub content_hash: String,
    pub last_synced_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Plans (analyzer / consolidator / generator currency)
// ---------------------------------------------------------------------------

/// Whether a proposed document targets a new slug or an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
}

/// A column of a schema table referenced by a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A schema table referenced by a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedTable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<TableColumn>,
}

/// A proposed document, produced by analysis and refined through
/// consolidation and generation before reconciliation applies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub slug: String,
    pub title: String,
    pub action: PlanAction,
    /// Full markdown, or a short stub the generator expands.
    pub content: String,
    /// Source file paths this document covers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_files: Vec<String>,
    /// Schema tables this document covers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_tables: Vec<RelatedTable>,
    /// Category name (resolved to an id at reconcile time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Analyzer notes about overlap with existing content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Review annotations
// ---------------------------------------------------------------------------

/// How urgently a review annotation deserves attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = DocstewardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(DocstewardError::validation(format!(
                "unknown severity: {other}"
            ))),
        }
    }
}

/// Advisory metadata attached to a document after a clean merge.
/// Never modifies document content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAnnotation {
    pub id: String,
    pub document_id: String,
    /// The merged version this annotation reviewed, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Exact heading of the flagged section.
    pub section_heading: String,
    /// What deserves human attention.
    pub concern: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sync runs
// ---------------------------------------------------------------------------

/// Lifecycle state of a sync run. `Running` doubles as the sync lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = DocstewardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DocstewardError::validation(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// What started a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Streaming,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = DocstewardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "streaming" => Ok(Self::Streaming),
            other => Err(DocstewardError::validation(format!(
                "unknown trigger type: {other}"
            ))),
        }
    }
}

/// LLM token accounting, aggregated across every call in a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Provider-reported cost in USD, 0 when not reported.
    pub cost: f64,
}

impl TokenUsage {
    /// Fold another call's usage into this total.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost += other.cost;
    }
}

/// Counters accumulated during a run and persisted at completion.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub files_added: u64,
    pub files_modified: u64,
    pub files_removed: u64,
    pub documents_created: u64,
    pub documents_updated: u64,
    pub documents_conflicted: u64,
    pub usage: TokenUsage,
    /// Per-unit failures that degraded but did not abort the run.
    pub errors: Vec<String>,
}

/// A persisted sync run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub status: RunStatus,
    pub trigger: TriggerType,
    pub files_added: u64,
    pub files_modified: u64,
    pub files_removed: u64,
    pub documents_created: u64,
    pub documents_updated: u64,
    pub documents_conflicted: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    /// Per-unit failure messages collected while the run degraded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_log: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Fatal error for `failed` runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_source_roundtrip() {
        for source in [
            ChangeSource::AiGenerated,
            ChangeSource::AiUpdated,
            ChangeSource::HumanEdited,
            ChangeSource::AiMerged,
            ChangeSource::Draft,
        ] {
            let s = source.to_string();
            let parsed: ChangeSource = s.parse().expect("parse change source");
            assert_eq!(source, parsed);
        }
        assert!("robot_edited".parse::<ChangeSource>().is_err());
    }

    #[test]
    fn ai_authorship() {
        assert!(ChangeSource::AiGenerated.is_ai());
        assert!(ChangeSource::AiUpdated.is_ai());
        assert!(ChangeSource::AiMerged.is_ai());
        assert!(!ChangeSource::HumanEdited.is_ai());
        assert!(!ChangeSource::Draft.is_ai());
    }

    #[test]
    fn plan_deserializes_with_defaults() {
        let json = r###"{
            "slug": "auth-overview",
            "title": "Authentication Overview",
            "action": "create",
            "content": "## Authentication\n\nCovers login and sessions."
        }"###;
        let plan: DocumentPlan = serde_json::from_str(json).expect("deserialize");
        assert_eq!(plan.slug, "auth-overview");
        assert_eq!(plan.action, PlanAction::Create);
        assert!(plan.related_files.is_empty());
        assert!(plan.related_tables.is_empty());
        assert!(plan.category.is_none());
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 40,
            cost: 0.002,
        });
        total.add(&TokenUsage {
            prompt_tokens: 50,
            completion_tokens: 10,
            cost: 0.001,
        });
        assert_eq!(total.prompt_tokens, 150);
        assert_eq!(total.completion_tokens, 50);
        assert!((total.cost - 0.003).abs() < 1e-9);
    }

    #[test]
    fn new_ids_are_time_sortable() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        // UUID v7 sorts lexicographically by creation time.
        assert!(a <= b);
    }
}
