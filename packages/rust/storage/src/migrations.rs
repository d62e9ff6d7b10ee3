//! SQL migration definitions for the docsteward database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: source files, documents, versions, links, runs, settings, llm cache",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tracked source files (one row per included repository file)
CREATE TABLE IF NOT EXISTS source_files (
    id             TEXT PRIMARY KEY,
    path           TEXT NOT NULL UNIQUE,
    content_hash   TEXT NOT NULL,
    last_synced_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_source_files_hash ON source_files(content_hash);

-- Documentation categories
CREATE TABLE IF NOT EXISTS categories (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at  TEXT NOT NULL
);

-- Live documentation pages
CREATE TABLE IF NOT EXISTS documents (
    id                   TEXT PRIMARY KEY,
    slug                 TEXT NOT NULL UNIQUE,
    title                TEXT NOT NULL,
    content              TEXT NOT NULL,
    category_id          TEXT REFERENCES categories(id) ON DELETE SET NULL,
    has_human_edits      INTEGER NOT NULL DEFAULT 0,
    needs_review         INTEGER NOT NULL DEFAULT 0,
    last_ai_generated_at TEXT,
    last_human_edited_at TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_category ON documents(category_id);

-- Append-only version history
CREATE TABLE IF NOT EXISTS document_versions (
    id             TEXT PRIMARY KEY,
    document_id    TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    content        TEXT NOT NULL,
    change_source  TEXT NOT NULL CHECK (change_source IN
                   ('ai_generated','ai_updated','human_edited','ai_merged','draft')),
    change_summary TEXT,
    author         TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_versions_document ON document_versions(document_id);

-- Document <-> source file links
CREATE TABLE IF NOT EXISTS document_files (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    file_path   TEXT NOT NULL,
    PRIMARY KEY (document_id, file_path)
);

-- Document <-> schema table links (columns stored as JSON detail)
CREATE TABLE IF NOT EXISTS document_tables (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    table_name  TEXT NOT NULL,
    detail_json TEXT,
    PRIMARY KEY (document_id, table_name)
);

-- Advisory review annotations (metadata only, never content)
CREATE TABLE IF NOT EXISTS review_annotations (
    id              TEXT PRIMARY KEY,
    document_id     TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    version_id      TEXT REFERENCES document_versions(id) ON DELETE SET NULL,
    section_heading TEXT NOT NULL,
    concern         TEXT NOT NULL,
    severity        TEXT NOT NULL CHECK (severity IN ('info','warning','error')),
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_annotations_document ON review_annotations(document_id);

-- Sync run history; the single 'running' row doubles as the sync lock
CREATE TABLE IF NOT EXISTS sync_runs (
    id                   TEXT PRIMARY KEY,
    status               TEXT NOT NULL CHECK (status IN ('running','completed','failed')),
    trigger_type         TEXT NOT NULL CHECK (trigger_type IN ('manual','scheduled','streaming')),
    files_added          INTEGER NOT NULL DEFAULT 0,
    files_modified       INTEGER NOT NULL DEFAULT 0,
    files_removed        INTEGER NOT NULL DEFAULT 0,
    documents_created    INTEGER NOT NULL DEFAULT 0,
    documents_updated    INTEGER NOT NULL DEFAULT 0,
    documents_conflicted INTEGER NOT NULL DEFAULT 0,
    prompt_tokens        INTEGER NOT NULL DEFAULT 0,
    completion_tokens    INTEGER NOT NULL DEFAULT 0,
    cost                 REAL NOT NULL DEFAULT 0,
    error_log            TEXT,
    started_at           TEXT NOT NULL,
    completed_at         TEXT,
    error_message        TEXT
);

-- Enforces the single-writer invariant at the storage level
CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_runs_single_running
    ON sync_runs(status) WHERE status = 'running';

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at);

-- Key/value sync settings (patterns, prompts, schedule, tuning)
CREATE TABLE IF NOT EXISTS settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- LLM completion cache
CREATE TABLE IF NOT EXISTS llm_cache (
    id          TEXT PRIMARY KEY,
    task        TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(task, prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
