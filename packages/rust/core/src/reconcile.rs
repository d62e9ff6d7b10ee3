//! Reconciliation: apply a proposed document without losing human work.
//!
//! The final arbiter of every write. A document nobody edited is simply
//! overwritten. A human-edited document goes through a three-way merge
//! against the last AI-authored version; a clean merge lands, a conflicted
//! one leaves the live content byte-for-byte untouched and parks the
//! incoming text as a version for the review surface. Conflict markers
//! never reach stored content.

use chrono::Utc;
use tracing::{debug, info, instrument};

use docsteward_merge::{MergeOutcome, normalize, three_way_merge};
use docsteward_shared::{
    ChangeSource, Document, DocumentPlan, PlanAction, Result, new_id,
};
use docsteward_storage::Storage;

use crate::notify::{NotificationEvent, NotificationSink};

/// Terminal state of one document's reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New document inserted.
    Created { document_id: String },
    /// No human edits existed; live content was overwritten.
    Updated { document_id: String },
    /// Human edits merged cleanly; live content is the merged text.
    MergedClean { document_id: String, version_id: String },
    /// Overlapping edits; live content untouched, incoming parked as a
    /// version pending review.
    Conflicted {
        document_id: String,
        version_id: String,
        conflicts: usize,
    },
}

impl ReconcileOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            Self::Created { document_id }
            | Self::Updated { document_id }
            | Self::MergedClean { document_id, .. }
            | Self::Conflicted { document_id, .. } => document_id,
        }
    }
}

/// Apply one proposal and replace the document's file and table links.
///
/// The slug is the join key: a create proposal whose slug already exists
/// becomes an update, so analysis never duplicates a document by accident.
#[instrument(skip_all, fields(slug = %plan.slug, action = ?plan.action))]
pub async fn reconcile_plan(
    storage: &Storage,
    sink: &dyn NotificationSink,
    plan: &DocumentPlan,
) -> Result<ReconcileOutcome> {
    let incoming = normalize(&plan.content);

    let outcome = match storage.get_document_by_slug(&plan.slug).await? {
        None => create_document(storage, plan, &incoming).await?,
        Some(doc) => update_document(storage, sink, plan, doc, &incoming).await?,
    };

    storage
        .replace_document_files(outcome.document_id(), &plan.related_files)
        .await?;
    storage
        .replace_document_tables(outcome.document_id(), &plan.related_tables)
        .await?;

    Ok(outcome)
}

async fn resolve_category(storage: &Storage, plan: &DocumentPlan) -> Result<Option<String>> {
    match plan.category.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(Some(storage.ensure_category(name).await?)),
        _ => Ok(None),
    }
}

async fn create_document(
    storage: &Storage,
    plan: &DocumentPlan,
    incoming: &str,
) -> Result<ReconcileOutcome> {
    let category_id = resolve_category(storage, plan).await?;
    let now = Utc::now();
    let doc = Document {
        id: new_id(),
        slug: plan.slug.clone(),
        title: plan.title.clone(),
        content: incoming.to_string(),
        category_id,
        has_human_edits: false,
        needs_review: false,
        last_ai_generated_at: Some(now),
        last_human_edited_at: None,
        created_at: now,
        updated_at: now,
    };
    storage.insert_document(&doc).await?;
    storage
        .insert_version(
            &doc.id,
            incoming,
            ChangeSource::AiGenerated,
            Some("Created from source changes"),
            None,
        )
        .await?;

    info!(document_id = %doc.id, "document created");
    Ok(ReconcileOutcome::Created { document_id: doc.id })
}

async fn update_document(
    storage: &Storage,
    sink: &dyn NotificationSink,
    plan: &DocumentPlan,
    doc: Document,
    incoming: &str,
) -> Result<ReconcileOutcome> {
    if plan.action == PlanAction::Create {
        debug!(slug = %doc.slug, "create proposal targets an existing slug, updating instead");
    }
    // A proposal without a category keeps the document's current one.
    let category_id = match resolve_category(storage, plan).await? {
        Some(id) => Some(id),
        None => doc.category_id.clone(),
    };

    if !doc.has_human_edits {
        storage
            .ai_write_document(&doc.id, &plan.title, incoming, category_id.as_deref())
            .await?;
        storage
            .insert_version(
                &doc.id,
                incoming,
                ChangeSource::AiUpdated,
                Some("Updated from source changes"),
                None,
            )
            .await?;
        sink.emit(NotificationEvent::AiSyncUpdate {
            document_id: doc.id.clone(),
            slug: doc.slug.clone(),
        });

        info!(document_id = %doc.id, "document updated");
        return Ok(ReconcileOutcome::Updated { document_id: doc.id });
    }

    // The merge base is the last AI-authored version. A document humans
    // edited before the engine ever wrote it merges against empty, which
    // conflicts unless the proposal matches the human text.
    let base = storage
        .latest_ai_version(&doc.id)
        .await?
        .map(|version| normalize(&version.content))
        .unwrap_or_default();
    let current = normalize(&doc.content);

    match three_way_merge(&base, &current, incoming) {
        MergeOutcome::Clean(merged) => {
            storage
                .ai_write_document(&doc.id, &plan.title, &merged, category_id.as_deref())
                .await?;
            let version_id = storage
                .insert_version(
                    &doc.id,
                    &merged,
                    ChangeSource::AiMerged,
                    Some("Merged with human edits"),
                    None,
                )
                .await?;
            sink.emit(NotificationEvent::AiSyncUpdate {
                document_id: doc.id.clone(),
                slug: doc.slug.clone(),
            });

            info!(document_id = %doc.id, "merged cleanly with human edits");
            Ok(ReconcileOutcome::MergedClean { document_id: doc.id, version_id })
        }
        MergeOutcome::Conflicting { conflicts, .. } => {
            // Live content stays exactly as the human left it. The incoming
            // text is parked as a version the review surface can diff and
            // apply; the conflict-marked text is discarded.
            let summary = format!(
                "Sync proposal with {conflicts} conflicting region{}",
                if conflicts == 1 { "" } else { "s" }
            );
            let version_id = storage
                .insert_version(&doc.id, incoming, ChangeSource::AiMerged, Some(&summary), None)
                .await?;
            storage.set_needs_review(&doc.id, true).await?;

            let recipient = storage.last_human_author(&doc.id).await?;
            sink.emit(NotificationEvent::AiConflict {
                document_id: doc.id.clone(),
                slug: doc.slug.clone(),
                version_id: version_id.clone(),
                conflicts,
                recipient,
            });

            info!(document_id = %doc.id, conflicts, "merge conflicted, live content preserved");
            Ok(ReconcileOutcome::Conflicted { document_id: doc.id, version_id, conflicts })
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::notify::CollectingSink;

    use super::*;

    async fn temp_storage() -> Storage {
        let path = std::env::temp_dir().join(format!("ds_test_{}.db", Uuid::now_v7()));
        Storage::open(&path).await.expect("open temp storage")
    }

    fn plan(slug: &str, action: PlanAction, content: &str) -> DocumentPlan {
        DocumentPlan {
            slug: slug.into(),
            title: format!("Title of {slug}"),
            action,
            content: content.into(),
            related_files: vec![],
            related_tables: vec![],
            category: None,
            conflict_notes: None,
        }
    }

    #[tokio::test]
    async fn creates_a_new_document_with_links() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        let mut proposal = plan("auth", PlanAction::Create, "# Auth\n\nHow login works.\n");
        proposal.related_files = vec!["src/auth.ts".into()];
        proposal.category = Some("Backend".into());

        let outcome = reconcile_plan(&storage, &sink, &proposal).await.unwrap();
        let ReconcileOutcome::Created { document_id } = outcome else {
            panic!("expected Created, got {outcome:?}");
        };

        let doc = storage.get_document(&document_id).await.unwrap().unwrap();
        assert_eq!(doc.slug, "auth");
        assert!(doc.content.contains("How login works."));
        assert!(!doc.has_human_edits);
        assert!(doc.category_id.is_some());

        let versions = storage.list_versions(&document_id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].change_source, ChangeSource::AiGenerated);

        let files = storage.get_document_files(&document_id).await.unwrap();
        assert_eq!(files, vec!["src/auth.ts"]);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn create_proposal_on_existing_slug_updates_it() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        let first = plan("auth", PlanAction::Create, "# Auth\n\nVersion one.\n");
        reconcile_plan(&storage, &sink, &first).await.unwrap();

        let second = plan("auth", PlanAction::Create, "# Auth\n\nVersion two.\n");
        let outcome = reconcile_plan(&storage, &sink, &second).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));

        let doc = storage.get_document_by_slug("auth").await.unwrap().unwrap();
        assert!(doc.content.contains("Version two."));
        let versions = storage.list_versions(&doc.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].change_source, ChangeSource::AiUpdated);
    }

    #[tokio::test]
    async fn untouched_document_is_overwritten() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        reconcile_plan(
            &storage,
            &sink,
            &plan("db", PlanAction::Create, "# Database\n\nOld schema notes.\n"),
        )
        .await
        .unwrap();
        let outcome = reconcile_plan(
            &storage,
            &sink,
            &plan("db", PlanAction::Update, "# Database\n\nNew schema notes.\n"),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
        let doc = storage.get_document_by_slug("db").await.unwrap().unwrap();
        assert_eq!(doc.content, "# Database\n\nNew schema notes.\n");
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].kind(), "ai_sync_update");
    }

    #[tokio::test]
    async fn separate_edits_merge_cleanly() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        reconcile_plan(
            &storage,
            &sink,
            &plan("guide", PlanAction::Create, "# Title\n\nOld description.\n"),
        )
        .await
        .unwrap();
        let doc = storage.get_document_by_slug("guide").await.unwrap().unwrap();

        // A human appends a paragraph the engine knows nothing about.
        storage
            .apply_human_edit(
                &doc.id,
                "# Title\n\nOld description.\n\nHuman-added note.\n",
                Some("dana"),
            )
            .await
            .unwrap();

        let outcome = reconcile_plan(
            &storage,
            &sink,
            &plan("guide", PlanAction::Update, "# Title\n\nNew description.\n"),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::MergedClean { .. }));

        let doc = storage.get_document_by_slug("guide").await.unwrap().unwrap();
        assert_eq!(doc.content, "# Title\n\nNew description.\n\nHuman-added note.\n");
        assert!(doc.has_human_edits);
        assert!(!doc.needs_review);

        let versions = storage.list_versions(&doc.id).await.unwrap();
        assert_eq!(versions[0].change_source, ChangeSource::AiMerged);
    }

    #[tokio::test]
    async fn conflict_preserves_live_content_and_notifies_the_editor() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        reconcile_plan(
            &storage,
            &sink,
            &plan("ops", PlanAction::Create, "# Ops\n\nRestart the worker daily.\n"),
        )
        .await
        .unwrap();
        let doc = storage.get_document_by_slug("ops").await.unwrap().unwrap();

        let human_text = "# Ops\n\nRestart the worker weekly, never daily.\n";
        storage.apply_human_edit(&doc.id, human_text, Some("sam")).await.unwrap();

        let outcome = reconcile_plan(
            &storage,
            &sink,
            &plan("ops", PlanAction::Update, "# Ops\n\nRestart the worker hourly.\n"),
        )
        .await
        .unwrap();
        let ReconcileOutcome::Conflicted { document_id, version_id, conflicts } = outcome else {
            panic!("expected Conflicted, got {outcome:?}");
        };
        assert_eq!(conflicts, 1);

        // Live content is byte-for-byte what the human wrote.
        let doc = storage.get_document(&document_id).await.unwrap().unwrap();
        assert_eq!(doc.content, human_text);
        assert!(doc.needs_review);

        // The incoming text is parked as an ai_merged version, marker-free.
        let versions = storage.list_versions(&document_id).await.unwrap();
        let parked = versions.iter().find(|v| v.id == version_id).unwrap();
        assert_eq!(parked.change_source, ChangeSource::AiMerged);
        assert!(parked.content.contains("hourly"));
        assert!(!parked.content.contains("<<<<<<<"));
        assert!(
            parked
                .change_summary
                .as_deref()
                .unwrap()
                .contains("1 conflicting region")
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let NotificationEvent::AiConflict { recipient, conflicts, .. } = &events[0] else {
            panic!("expected AiConflict, got {:?}", events[0]);
        };
        assert_eq!(recipient.as_deref(), Some("sam"));
        assert_eq!(*conflicts, 1);
    }

    #[tokio::test]
    async fn repeated_proposal_after_conflict_is_clean() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        reconcile_plan(
            &storage,
            &sink,
            &plan("ops", PlanAction::Create, "# Ops\n\nRestart daily.\n"),
        )
        .await
        .unwrap();
        let doc = storage.get_document_by_slug("ops").await.unwrap().unwrap();
        storage
            .apply_human_edit(&doc.id, "# Ops\n\nRestart weekly.\n", Some("sam"))
            .await
            .unwrap();

        let proposal = plan("ops", PlanAction::Update, "# Ops\n\nRestart hourly.\n");
        let first = reconcile_plan(&storage, &sink, &proposal).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Conflicted { .. }));

        // The parked version is now the merge base, so the same proposal
        // again merges clean: the human text wins without a second alarm.
        let second = reconcile_plan(&storage, &sink, &proposal).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::MergedClean { .. }));
        let doc = storage.get_document_by_slug("ops").await.unwrap().unwrap();
        assert!(doc.content.contains("weekly"));
    }

    #[tokio::test]
    async fn human_document_without_ai_history_conflicts() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        // Document born from a human, never AI-written: empty merge base.
        let now = Utc::now();
        let doc = Document {
            id: new_id(),
            slug: "handbook".into(),
            title: "Handbook".into(),
            content: "# Handbook\n\nWritten by hand.\n".into(),
            category_id: None,
            has_human_edits: false,
            needs_review: false,
            last_ai_generated_at: None,
            last_human_edited_at: None,
            created_at: now,
            updated_at: now,
        };
        storage.insert_document(&doc).await.unwrap();
        storage
            .apply_human_edit(&doc.id, "# Handbook\n\nWritten by hand.\n", Some("kim"))
            .await
            .unwrap();

        let outcome = reconcile_plan(
            &storage,
            &sink,
            &plan("handbook", PlanAction::Update, "# Handbook\n\nGenerated text.\n"),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Conflicted { .. }));
        let doc = storage.get_document_by_slug("handbook").await.unwrap().unwrap();
        assert_eq!(doc.content, "# Handbook\n\nWritten by hand.\n");
    }

    #[tokio::test]
    async fn links_are_fully_replaced_on_update() {
        let storage = temp_storage().await;
        let sink = CollectingSink::default();

        let mut first = plan("api", PlanAction::Create, "# API\n\nBody.\n");
        first.related_files = vec!["src/a.ts".into(), "src/b.ts".into()];
        reconcile_plan(&storage, &sink, &first).await.unwrap();

        let mut second = plan("api", PlanAction::Update, "# API\n\nNewer body.\n");
        second.related_files = vec!["src/b.ts".into(), "src/c.ts".into()];
        let outcome = reconcile_plan(&storage, &sink, &second).await.unwrap();

        let files = storage.get_document_files(outcome.document_id()).await.unwrap();
        assert_eq!(files, vec!["src/b.ts", "src/c.ts"]);
    }
}
