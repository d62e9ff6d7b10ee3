//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding tracked source
//! files, documents with their append-only version history, document links,
//! review annotations, sync run history, settings, and the LLM cache.
//!
//! **Access rules:**
//! - Sync engine and mutating CLI commands: read-write via [`Storage::open`]
//! - Read-only CLI commands: [`Storage::open_readonly`]
//!
//! The single `running` row in `sync_runs` doubles as the sync lock, enforced
//! by a conditional insert backed by a partial unique index. Acquisition
//! never blocks: a held lock means the caller's run simply does not happen.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use docsteward_shared::{
    Category, ChangeSource, DocstewardError, Document, DocumentVersion, RelatedTable, Result,
    ReviewAnnotation, RunStats, RunStatus, SourceFileRecord, SyncRun, TriggerType, new_id,
};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocstewardError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DocstewardError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocstewardError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Source file operations
    // -----------------------------------------------------------------------

    /// List every tracked source file, ordered by path.
    pub async fn list_source_files(&self) -> Result<Vec<SourceFileRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, path, content_hash, last_synced_at FROM source_files ORDER BY path",
                params![],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_source_file(&row)?);
        }
        Ok(results)
    }

    /// Insert or update a tracked source file by path.
    pub async fn upsert_source_file(&self, path: &str, content_hash: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO source_files (id, path, content_hash, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                   content_hash = excluded.content_hash,
                   last_synced_at = excluded.last_synced_at",
                params![new_id().as_str(), path, content_hash, now.as_str()],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove a tracked source file by path.
    pub async fn delete_source_file(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM source_files WHERE path = ?1", params![path])
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Category operations
    // -----------------------------------------------------------------------

    /// Get a category by name.
    pub async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description, created_at FROM categories WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_category(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// Get the id for a category name, creating the category if absent.
    /// An existing name returns the existing record rather than erroring.
    pub async fn ensure_category(&self, name: &str) -> Result<String> {
        self.check_writable()?;
        if let Some(cat) = self.get_category_by_name(name).await? {
            return Ok(cat.id);
        }

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO categories (id, name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO NOTHING",
                params![new_id().as_str(), name, now.as_str()],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        // Re-fetch: a concurrent insert may have won the conflict.
        self.get_category_by_name(name)
            .await?
            .map(|c| c.id)
            .ok_or_else(|| DocstewardError::Storage(format!("category {name} vanished")))
    }

    /// List all categories, ordered by name.
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description, created_at FROM categories ORDER BY name",
                params![],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_category(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Insert a new document.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO documents (id, slug, title, content, category_id,
                   has_human_edits, needs_review, last_ai_generated_at,
                   last_human_edited_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    doc.id.as_str(),
                    doc.slug.as_str(),
                    doc.title.as_str(),
                    doc.content.as_str(),
                    doc.category_id.as_deref(),
                    doc.has_human_edits as i64,
                    doc.needs_review as i64,
                    doc.last_ai_generated_at.map(|t| t.to_rfc3339()),
                    doc.last_human_edited_at.map(|t| t.to_rfc3339()),
                    doc.created_at.to_rfc3339(),
                    doc.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a document by id.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.query_document("id", id).await
    }

    /// Get a document by slug.
    pub async fn get_document_by_slug(&self, slug: &str) -> Result<Option<Document>> {
        self.query_document("slug", slug).await
    }

    async fn query_document(&self, column: &str, key: &str) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT id, slug, title, content, category_id, has_human_edits, needs_review,
               last_ai_generated_at, last_human_edited_at, created_at, updated_at
             FROM documents WHERE {column} = ?1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![key])
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// List all documents, ordered by slug.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, slug, title, content, category_id, has_human_edits, needs_review,
                   last_ai_generated_at, last_human_edited_at, created_at, updated_at
                 FROM documents ORDER BY slug",
                params![],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }

    /// Overwrite a document's content from the sync engine, updating the
    /// AI-generation timestamp. Never touches the human-edit flag.
    pub async fn ai_write_document(
        &self,
        id: &str,
        title: &str,
        content: &str,
        category_id: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE documents SET title = ?1, content = ?2, category_id = ?3,
                   last_ai_generated_at = ?4, updated_at = ?4
                 WHERE id = ?5",
                params![title, content, category_id, now.as_str(), id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Apply a human edit: replaces content, latches the human-edit flag,
    /// and records a `human_edited` version. Returns the version id.
    ///
    /// This is the write path editing surfaces must use so the sync engine
    /// can tell human work from its own.
    pub async fn apply_human_edit(
        &self,
        document_id: &str,
        content: &str,
        author: Option<&str>,
    ) -> Result<String> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE documents SET content = ?1, has_human_edits = 1,
                   last_human_edited_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![content, now.as_str(), document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        self.insert_version(document_id, content, ChangeSource::HumanEdited, None, author)
            .await
    }

    /// Set or clear the needs-review flag.
    pub async fn set_needs_review(&self, document_id: &str, needs_review: bool) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE documents SET needs_review = ?1, updated_at = ?2 WHERE id = ?3",
                params![needs_review as i64, now.as_str(), document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete a document. Versions, links, and annotations cascade.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Version operations (append-only)
    // -----------------------------------------------------------------------

    /// Append a version snapshot. Returns the version id.
    pub async fn insert_version(
        &self,
        document_id: &str,
        content: &str,
        change_source: ChangeSource,
        change_summary: Option<&str>,
        author: Option<&str>,
    ) -> Result<String> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO document_versions
                   (id, document_id, content, change_source, change_summary, author, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.as_str(),
                    document_id,
                    content,
                    change_source.as_str(),
                    change_summary,
                    author,
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// List a document's versions, newest first.
    pub async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_id, content, change_source, change_summary, author, created_at
                 FROM document_versions WHERE document_id = ?1
                 ORDER BY created_at DESC, id DESC",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_version(&row)?);
        }
        Ok(results)
    }

    /// The most recent AI-authored version, used as the merge base.
    pub async fn latest_ai_version(&self, document_id: &str) -> Result<Option<DocumentVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_id, content, change_source, change_summary, author, created_at
                 FROM document_versions
                 WHERE document_id = ?1
                   AND change_source IN ('ai_generated', 'ai_updated', 'ai_merged')
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_version(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// The author of the most recent human edit, if any was recorded.
    pub async fn last_human_author(&self, document_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT author FROM document_versions
                 WHERE document_id = ?1 AND change_source = 'human_edited'
                   AND author IS NOT NULL
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Document link operations
    // -----------------------------------------------------------------------

    /// Replace a document's source-file links with the given set.
    /// Replacing with an identical set is an idempotent no-op.
    pub async fn replace_document_files(&self, document_id: &str, paths: &[String]) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM document_files WHERE document_id = ?1",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        for path in paths {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO document_files (document_id, file_path) VALUES (?1, ?2)",
                    params![document_id, path.as_str()],
                )
                .await
                .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// List the source-file paths linked to a document.
    pub async fn get_document_files(&self, document_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT file_path FROM document_files WHERE document_id = ?1 ORDER BY file_path",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(
                row.get::<String>(0)
                    .map_err(|e| DocstewardError::Storage(e.to_string()))?,
            );
        }
        Ok(results)
    }

    /// Replace a document's schema-table links with the given set.
    pub async fn replace_document_tables(
        &self,
        document_id: &str,
        tables: &[RelatedTable],
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM document_tables WHERE document_id = ?1",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        for table in tables {
            let detail = serde_json::to_string(table)
                .map_err(|e| DocstewardError::Storage(e.to_string()))?;
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO document_tables (document_id, table_name, detail_json)
                     VALUES (?1, ?2, ?3)",
                    params![document_id, table.name.as_str(), detail.as_str()],
                )
                .await
                .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// List the schema tables linked to a document.
    pub async fn get_document_tables(&self, document_id: &str) -> Result<Vec<RelatedTable>> {
        let mut rows = self
            .conn
            .query(
                "SELECT table_name, detail_json FROM document_tables
                 WHERE document_id = ?1 ORDER BY table_name",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let name: String = row
                .get(0)
                .map_err(|e| DocstewardError::Storage(e.to_string()))?;
            let detail: Option<String> = row.get(1).ok();
            let table = match detail {
                Some(json) => serde_json::from_str(&json)
                    .map_err(|e| DocstewardError::Storage(e.to_string()))?,
                None => RelatedTable {
                    name,
                    description: None,
                    columns: Vec::new(),
                },
            };
            results.push(table);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Review annotation operations
    // -----------------------------------------------------------------------

    /// Record a review annotation. Returns the annotation id.
    pub async fn insert_annotation(
        &self,
        document_id: &str,
        version_id: Option<&str>,
        section_heading: &str,
        concern: &str,
        severity: docsteward_shared::Severity,
    ) -> Result<String> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO review_annotations
                   (id, document_id, version_id, section_heading, concern, severity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.as_str(),
                    document_id,
                    version_id,
                    section_heading,
                    concern,
                    severity.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// List a document's annotations, newest first.
    pub async fn list_annotations(&self, document_id: &str) -> Result<Vec<ReviewAnnotation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_id, version_id, section_heading, concern, severity, created_at
                 FROM review_annotations WHERE document_id = ?1
                 ORDER BY created_at DESC, id DESC",
                params![document_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_annotation(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Sync run operations
    // -----------------------------------------------------------------------

    /// Try to start a sync run, acquiring the sync lock.
    ///
    /// The conditional insert succeeds only when no `running` row exists;
    /// a partial unique index closes the race between two writers. Returns
    /// the new run id, or `None` when a run is already in flight. Never
    /// blocks and never queues.
    pub async fn try_start_run(&self, trigger: TriggerType) -> Result<Option<String>> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();

        let result = self
            .conn
            .execute(
                "INSERT INTO sync_runs (id, status, trigger_type, started_at)
                 SELECT ?1, 'running', ?2, ?3
                 WHERE NOT EXISTS (SELECT 1 FROM sync_runs WHERE status = 'running')",
                params![id.as_str(), trigger.as_str(), now.as_str()],
            )
            .await;

        match result {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(id)),
            // A racing insert can slip past the NOT EXISTS check and land on
            // the partial unique index instead; that loss is not an error.
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// Record a run's terminal state and statistics, releasing the lock.
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        stats: &RunStats,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let error_log = serde_json::to_string(&stats.errors)
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "UPDATE sync_runs SET status = ?1,
                   files_added = ?2, files_modified = ?3, files_removed = ?4,
                   documents_created = ?5, documents_updated = ?6, documents_conflicted = ?7,
                   prompt_tokens = ?8, completion_tokens = ?9, cost = ?10,
                   error_log = ?11, completed_at = ?12, error_message = ?13
                 WHERE id = ?14",
                params![
                    status.as_str(),
                    stats.files_added as i64,
                    stats.files_modified as i64,
                    stats.files_removed as i64,
                    stats.documents_created as i64,
                    stats.documents_updated as i64,
                    stats.documents_conflicted as i64,
                    stats.usage.prompt_tokens as i64,
                    stats.usage.completion_tokens as i64,
                    stats.usage.cost,
                    error_log.as_str(),
                    now.as_str(),
                    error_message,
                    run_id,
                ],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a sync run by id.
    pub async fn get_run(&self, id: &str) -> Result<Option<SyncRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, trigger_type, files_added, files_modified, files_removed,
                   documents_created, documents_updated, documents_conflicted,
                   prompt_tokens, completion_tokens, cost, error_log,
                   started_at, completed_at, error_message
                 FROM sync_runs WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// List recent sync runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, trigger_type, files_added, files_modified, files_removed,
                   documents_created, documents_updated, documents_conflicted,
                   prompt_tokens, completion_tokens, cost, error_log,
                   started_at, completed_at, error_message
                 FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    /// The most recent successfully completed run, used for schedule gating.
    pub async fn latest_completed_run(&self) -> Result<Option<SyncRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, trigger_type, files_added, files_modified, files_removed,
                   documents_created, documents_updated, documents_conflicted,
                   prompt_tokens, completion_tokens, cost, error_log,
                   started_at, completed_at, error_message
                 FROM sync_runs WHERE status = 'completed'
                 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Settings operations
    // -----------------------------------------------------------------------

    /// Get a setting value by key.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| DocstewardError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// Set a setting value (upserts).
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List all settings as `(key, value)` pairs, ordered by key.
    pub async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let mut rows = self
            .conn
            .query("SELECT key, value FROM settings ORDER BY key", params![])
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0)
                    .map_err(|e| DocstewardError::Storage(e.to_string()))?,
                row.get::<String>(1)
                    .map_err(|e| DocstewardError::Storage(e.to_string()))?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // LLM cache operations
    // -----------------------------------------------------------------------

    /// Get a cached completion result.
    pub async fn get_cached_completion(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM llm_cache
                 WHERE task = ?1 AND prompt_hash = ?2 AND model_id = ?3",
                params![task, prompt_hash, model_id],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let result: String = row
                    .get(0)
                    .map_err(|e| DocstewardError::Storage(e.to_string()))?;
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DocstewardError::Storage(e.to_string())),
        }
    }

    /// Store a completion result in the cache (upserts).
    pub async fn put_cached_completion(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO llm_cache (id, task, prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task, prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![
                    new_id().as_str(),
                    task,
                    prompt_hash,
                    model_id,
                    result_json,
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| DocstewardError::Storage(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DocstewardError::Storage(format!("invalid date: {e}")))
}

fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| DocstewardError::Storage(e.to_string()))
}

fn get_i64(row: &libsql::Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx)
        .map_err(|e| DocstewardError::Storage(e.to_string()))
}

fn row_to_source_file(row: &libsql::Row) -> Result<SourceFileRecord> {
    Ok(SourceFileRecord {
        id: get_string(row, 0)?,
        path: get_string(row, 1)?,
        content_hash: get_string(row, 2)?,
        last_synced_at: parse_ts(&get_string(row, 3)?)?,
    })
}

fn row_to_category(row: &libsql::Row) -> Result<Category> {
    Ok(Category {
        id: get_string(row, 0)?,
        name: get_string(row, 1)?,
        description: row.get::<String>(2).ok(),
        created_at: parse_ts(&get_string(row, 3)?)?,
    })
}

fn row_to_document(row: &libsql::Row) -> Result<Document> {
    Ok(Document {
        id: get_string(row, 0)?,
        slug: get_string(row, 1)?,
        title: get_string(row, 2)?,
        content: get_string(row, 3)?,
        category_id: row.get::<String>(4).ok(),
        has_human_edits: get_i64(row, 5)? != 0,
        needs_review: get_i64(row, 6)? != 0,
        last_ai_generated_at: match row.get::<String>(7).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        last_human_edited_at: match row.get::<String>(8).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        created_at: parse_ts(&get_string(row, 9)?)?,
        updated_at: parse_ts(&get_string(row, 10)?)?,
    })
}

fn row_to_version(row: &libsql::Row) -> Result<DocumentVersion> {
    Ok(DocumentVersion {
        id: get_string(row, 0)?,
        document_id: get_string(row, 1)?,
        content: get_string(row, 2)?,
        change_source: get_string(row, 3)?.parse()?,
        change_summary: row.get::<String>(4).ok(),
        author: row.get::<String>(5).ok(),
        created_at: parse_ts(&get_string(row, 6)?)?,
    })
}

fn row_to_annotation(row: &libsql::Row) -> Result<ReviewAnnotation> {
    Ok(ReviewAnnotation {
        id: get_string(row, 0)?,
        document_id: get_string(row, 1)?,
        version_id: row.get::<String>(2).ok(),
        section_heading: get_string(row, 3)?,
        concern: get_string(row, 4)?,
        severity: get_string(row, 5)?.parse()?,
        created_at: parse_ts(&get_string(row, 6)?)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<SyncRun> {
    let error_log = match row.get::<String>(12).ok() {
        Some(json) => {
            serde_json::from_str(&json).map_err(|e| DocstewardError::Storage(e.to_string()))?
        }
        None => Vec::new(),
    };
    Ok(SyncRun {
        id: get_string(row, 0)?,
        status: get_string(row, 1)?.parse()?,
        trigger: get_string(row, 2)?.parse()?,
        files_added: get_i64(row, 3)? as u64,
        files_modified: get_i64(row, 4)? as u64,
        files_removed: get_i64(row, 5)? as u64,
        documents_created: get_i64(row, 6)? as u64,
        documents_updated: get_i64(row, 7)? as u64,
        documents_conflicted: get_i64(row, 8)? as u64,
        prompt_tokens: get_i64(row, 9)? as u64,
        completion_tokens: get_i64(row, 10)? as u64,
        cost: row.get::<f64>(11).unwrap_or(0.0),
        error_log,
        started_at: parse_ts(&get_string(row, 13)?)?,
        completed_at: match row.get::<String>(14).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        error_message: row.get::<String>(15).ok(),
    })
}
