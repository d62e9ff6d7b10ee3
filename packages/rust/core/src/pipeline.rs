//! End-to-end sync pipeline.
//!
//! One run: acquire the lock, detect changes, optionally plan, analyze,
//! consolidate, then generate / reconcile / review each document in order.
//! Stage failures degrade to the run error log where the design allows it;
//! everything else marks the run failed and releases the lock. Callers get
//! a run record either way, never a crash.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;
use tracing::{debug, info, instrument, warn};

use docsteward_llm::CompletionClient;
use docsteward_merge::normalize;
use docsteward_shared::{
    AppConfig, ChangeSource, DocstewardError, DocumentPlan, Result, RunStats, RunStatus,
    TriggerType, llm_api_key, source_token, with_retry,
};
use docsteward_source::{EntryKind, RepoRef, SourceClient};
use docsteward_storage::Storage;

use crate::analyze::{self, AnalysisContext};
use crate::consolidate;
use crate::detect;
use crate::generate;
use crate::lock;
use crate::notify::NotificationSink;
use crate::plan;
use crate::reconcile::{self, ReconcileOutcome};
use crate::review;
use crate::settings::SyncSettings;
use crate::summarize;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Ordered progress lines for interactive and streaming surfaces.
pub trait ProgressSink: Send + Sync {
    /// A pipeline phase began.
    fn phase(&self, message: &str);
    /// One unit of work inside the current phase finished.
    fn item(&self, message: &str);
}

/// Discards all progress output.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn phase(&self, _message: &str) {}
    fn item(&self, _message: &str) {}
}

// ---------------------------------------------------------------------------
// Run entry points
// ---------------------------------------------------------------------------

/// Outcome of a sync attempt.
#[derive(Debug)]
pub enum SyncReport {
    /// Another run held the lock; nothing happened.
    AlreadyRunning,
    /// A run executed and its record was persisted, completed or failed.
    Finished {
        run_id: String,
        status: RunStatus,
        stats: RunStats,
    },
}

/// Run one sync end to end.
///
/// Returns `Ok` with a failed run report for run-level errors; `Err` is
/// reserved for infrastructure failures where not even the run record
/// could be written.
#[instrument(skip_all, fields(trigger = %trigger))]
pub async fn run_sync(
    config: &AppConfig,
    storage: &Storage,
    notifier: &dyn NotificationSink,
    trigger: TriggerType,
    progress: &dyn ProgressSink,
) -> Result<SyncReport> {
    let Some(run_id) = lock::acquire(storage, trigger).await? else {
        progress.phase("Sync already running, skipping");
        return Ok(SyncReport::AlreadyRunning);
    };

    let started = std::time::Instant::now();
    let mut stats = RunStats::default();
    match execute_run(config, storage, notifier, progress, &mut stats).await {
        Ok(()) => {
            lock::release(storage, &run_id, RunStatus::Completed, &stats, None).await?;
            info!(
                run_id = %run_id,
                elapsed_secs = started.elapsed().as_secs(),
                documents_created = stats.documents_created,
                documents_updated = stats.documents_updated,
                documents_conflicted = stats.documents_conflicted,
                errors = stats.errors.len(),
                "sync completed"
            );
            progress.phase(&format!(
                "Sync complete: {} created, {} updated, {} conflicted",
                stats.documents_created, stats.documents_updated, stats.documents_conflicted
            ));
            Ok(SyncReport::Finished { run_id, status: RunStatus::Completed, stats })
        }
        Err(error) => {
            warn!(run_id = %run_id, %error, "sync run failed");
            let message = error.to_string();
            lock::release(storage, &run_id, RunStatus::Failed, &stats, Some(&message)).await?;
            progress.phase(&format!("Sync failed: {message}"));
            Ok(SyncReport::Finished { run_id, status: RunStatus::Failed, stats })
        }
    }
}

/// Run a scheduled sync if the configured cron schedule says one is due.
///
/// Due means the first tick after the last completed run is in the past.
/// With no completed run yet, a schedule means "sync now". Failed runs do
/// not advance the schedule, so the next check retries.
pub async fn run_sync_if_due(
    config: &AppConfig,
    storage: &Storage,
    notifier: &dyn NotificationSink,
    progress: &dyn ProgressSink,
) -> Result<Option<SyncReport>> {
    let settings = SyncSettings::load(storage).await?;
    let Some(expression) = &settings.schedule else {
        debug!("no sync schedule configured");
        return Ok(None);
    };
    let schedule = Schedule::from_str(expression).map_err(|e| {
        DocstewardError::config(format!("invalid cron expression {expression:?}: {e}"))
    })?;

    if let Some(last) = storage.latest_completed_run().await? {
        let completed_at = last.completed_at.unwrap_or(last.started_at);
        match schedule.after(&completed_at).next() {
            Some(tick) if tick <= Utc::now() => {
                debug!(%tick, "scheduled sync is due");
            }
            _ => {
                debug!("next scheduled sync is in the future");
                return Ok(None);
            }
        }
    }

    let report = run_sync(config, storage, notifier, TriggerType::Scheduled, progress).await?;
    Ok(Some(report))
}

// ---------------------------------------------------------------------------
// Run body
// ---------------------------------------------------------------------------

/// A unit of analysis work: files plus the context they are read in.
struct WorkUnit {
    context: AnalysisContext,
    files: Vec<(String, String)>,
}

async fn execute_run(
    config: &AppConfig,
    storage: &Storage,
    notifier: &dyn NotificationSink,
    progress: &dyn ProgressSink,
    stats: &mut RunStats,
) -> Result<()> {
    // Settings and fail-fast configuration checks.
    let settings = SyncSettings::load(storage).await?;
    let repo_ref = settings
        .repo
        .as_deref()
        .ok_or_else(|| DocstewardError::config("no repository configured, set sync.repo"))?;
    let mut repo = RepoRef::parse(repo_ref)?;
    if let Some(branch) = &settings.branch {
        repo = repo.with_branch(branch.clone());
    }
    if settings.include.is_empty() {
        // Allow-list semantics: nothing syncs until paths are included.
        progress.phase("No include patterns configured, nothing to sync");
        return Ok(());
    }
    let token = source_token(config)?;
    let api_key = llm_api_key(config)?;
    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| config.llm.default_model.clone());

    let source = SourceClient::new(&config.source.base_url, Some(token))?
        .with_concurrency(config.source.fetch_concurrency as usize);
    let llm = CompletionClient::new(&config.llm.base_url, &api_key, &model)?;

    // Tree fetch and change detection.
    progress.phase(&format!("Fetching file tree for {repo}"));
    let tree = with_retry("tree fetch", || source.fetch_tree(&repo)).await?;
    let stored = storage.list_source_files().await?;
    let changes = detect::detect_changes(&tree, &stored, &settings.include);
    stats.files_added = changes.added.len() as u64;
    stats.files_modified = changes.modified.len() as u64;
    stats.files_removed = changes.removed.len() as u64;
    info!(
        added = changes.added.len(),
        modified = changes.modified.len(),
        removed = changes.removed.len(),
        "change detection finished"
    );

    if changes.is_empty() {
        progress.phase("Source tree unchanged, nothing to sync");
        return Ok(());
    }
    progress.phase(&format!(
        "Detected {} added, {} modified, {} removed",
        changes.added.len(),
        changes.modified.len(),
        changes.removed.len()
    ));

    // File metadata upkeep.
    let hash_by_path: HashMap<&str, &str> = tree
        .iter()
        .filter(|entry| entry.kind == EntryKind::Blob)
        .map(|entry| (entry.path.as_str(), entry.hash.as_str()))
        .collect();
    for path in changes.added.iter().chain(changes.modified.iter()) {
        if let Some(hash) = hash_by_path.get(path.as_str()) {
            storage.upsert_source_file(path, hash).await?;
        }
    }
    for path in &changes.removed {
        storage.delete_source_file(path).await?;
    }

    // Content fetch for changed files only.
    let changed_paths: Vec<String> = changes
        .added
        .iter()
        .chain(changes.modified.iter())
        .cloned()
        .collect();
    if changed_paths.is_empty() {
        progress.phase("Only removals this run, metadata updated");
        return Ok(());
    }
    progress.phase(&format!("Fetching {} changed files", changed_paths.len()));
    let contents = source
        .fetch_blobs(&repo, &changed_paths, config.source.max_file_bytes)
        .await?;
    if contents.is_empty() {
        progress.phase("No readable changed content, metadata updated only");
        return Ok(());
    }

    // Catalog context shared by planning and analysis.
    let categories: Vec<String> = storage
        .list_categories()
        .await?
        .into_iter()
        .map(|category| category.name)
        .collect();
    let document_index: Vec<(String, String)> = storage
        .list_documents()
        .await?
        .into_iter()
        .map(|doc| (doc.slug, doc.title))
        .collect();

    // Optional planning for large change sets.
    let expanded = if changes.content_changes() > settings.plan_threshold {
        progress.phase("Large change set, planning topic groups");
        plan_large_change_set(storage, &llm, &settings, &contents, &changed_paths, stats).await?
    } else {
        None
    };

    let units = match &expanded {
        Some(planned) => {
            let content_by_path: HashMap<&str, &str> = contents
                .iter()
                .map(|(path, content)| (path.as_str(), content.as_str()))
                .collect();
            planned
                .groups
                .iter()
                .enumerate()
                .map(|(i, group)| {
                    let files = group
                        .files
                        .iter()
                        .filter_map(|(path, _)| {
                            content_by_path
                                .get(path.as_str())
                                .map(|content| (path.clone(), content.to_string()))
                        })
                        .collect();
                    let mut scope = format!("{}: {}", group.name, group.description);
                    if !group.proposed_documents.is_empty() {
                        scope.push_str(&format!(
                            " (suggested documents: {})",
                            group.proposed_documents.join(", ")
                        ));
                    }
                    let sibling_groups = planned
                        .groups
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, sibling)| format!("{}: {}", sibling.name, sibling.description))
                        .collect();
                    WorkUnit {
                        context: AnalysisContext {
                            categories: categories.clone(),
                            documents: document_index.clone(),
                            group_scope: Some(scope),
                            sibling_groups,
                        },
                        files,
                    }
                })
                .collect()
        }
        None => vec![WorkUnit {
            context: AnalysisContext {
                categories: categories.clone(),
                documents: document_index.clone(),
                group_scope: None,
                sibling_groups: Vec::new(),
            },
            files: contents.clone(),
        }],
    };

    // Analysis across all units, merged by slug.
    let mut all_plans: Vec<DocumentPlan> = Vec::new();
    for unit in &units {
        if unit.files.is_empty() {
            continue;
        }
        let batches = analyze::build_batches(&unit.files);
        progress.phase(&format!(
            "Analyzing {} files in {} batches",
            unit.files.len(),
            batches.len()
        ));
        let unit_plans = analyze::analyze_batches(
            &llm,
            &settings.prompts.analyzer,
            &unit.context,
            &batches,
            &mut stats.usage,
            &mut stats.errors,
        )
        .await;
        all_plans.extend(unit_plans);
    }
    let proposals = analyze::merge_by_slug(all_plans);
    if proposals.is_empty() {
        progress.phase("No document proposals produced");
        return Ok(());
    }

    // Consolidation of same-topic drafts.
    progress.phase(&format!("Consolidating {} proposals", proposals.len()));
    let proposals = consolidate::consolidate_plans(
        &llm,
        &settings.prompts.consolidator,
        proposals,
        settings.consolidate_concurrency,
        &mut stats.usage,
        &mut stats.errors,
    )
    .await;

    // Per-document processing, sequential and individually degradable.
    for mut proposal in proposals {
        let slug = proposal.slug.clone();
        match process_document(storage, notifier, &llm, &settings, &mut proposal, stats).await {
            Ok(outcome) => progress.item(&format!("{slug}: {}", outcome_label(&outcome))),
            Err(error) => {
                warn!(slug = %slug, %error, "document processing failed");
                stats.errors.push(format!("document {slug}: {error}"));
                progress.item(&format!("{slug}: failed ({error})"));
            }
        }
    }

    Ok(())
}

async fn plan_large_change_set(
    storage: &Storage,
    llm: &CompletionClient,
    settings: &SyncSettings,
    contents: &[(String, String)],
    changed_paths: &[String],
    stats: &mut RunStats,
) -> Result<Option<plan::ExpandedPlan>> {
    let summaries =
        summarize::summarize_files(storage, llm, &settings.prompts.summarizer, contents, &mut stats.usage)
            .await?;
    let pairs: Vec<(String, String)> = contents
        .iter()
        .map(|(path, _)| (path.clone(), summaries.get(path).cloned().unwrap_or_default()))
        .collect();
    let buckets = plan::compress_buckets(&pairs);
    let linked = linked_documents(storage, changed_paths).await?;

    match plan::plan_groups(llm, &settings.prompts.planner, &buckets, &linked, &mut stats.usage).await
    {
        Ok(Some(response)) => {
            let expanded = plan::expand_groups(&response, &pairs);
            if expanded.groups.is_empty() {
                warn!("planner returned no usable groups, falling back to single-pass analysis");
                Ok(None)
            } else {
                info!(
                    groups = expanded.groups.len(),
                    shared_context = expanded.shared_context.len(),
                    "plan accepted"
                );
                Ok(Some(expanded))
            }
        }
        Ok(None) => {
            warn!("planner declined, falling back to single-pass analysis");
            Ok(None)
        }
        Err(error) => {
            warn!(%error, "planning failed, falling back to single-pass analysis");
            stats.errors.push(format!("planning failed: {error}"));
            Ok(None)
        }
    }
}

/// Existing documents linked to any changed file, surfaced to the planner
/// so updates win over near-duplicate creates.
async fn linked_documents(
    storage: &Storage,
    changed_paths: &[String],
) -> Result<Vec<(String, String)>> {
    let changed: HashSet<&str> = changed_paths.iter().map(String::as_str).collect();
    let mut linked = Vec::new();
    for doc in storage.list_documents().await? {
        let files = storage.get_document_files(&doc.id).await?;
        if files.iter().any(|file| changed.contains(file.as_str())) {
            linked.push((doc.slug, doc.title));
        }
    }
    Ok(linked)
}

async fn process_document(
    storage: &Storage,
    notifier: &dyn NotificationSink,
    llm: &CompletionClient,
    settings: &SyncSettings,
    proposal: &mut DocumentPlan,
    stats: &mut RunStats,
) -> Result<ReconcileOutcome> {
    generate::generate_content(llm, &settings.prompts.generator, proposal, &mut stats.usage).await?;

    let outcome = reconcile::reconcile_plan(storage, notifier, proposal).await?;
    match &outcome {
        ReconcileOutcome::Created { .. } => stats.documents_created += 1,
        ReconcileOutcome::Updated { .. } => stats.documents_updated += 1,
        ReconcileOutcome::MergedClean { document_id, version_id } => {
            stats.documents_updated += 1;
            review_clean_merge(
                storage,
                llm,
                settings,
                proposal,
                document_id,
                version_id,
                &mut stats.usage,
            )
            .await;
        }
        ReconcileOutcome::Conflicted { .. } => stats.documents_conflicted += 1,
    }
    Ok(outcome)
}

/// Reconstruct the three texts of a clean merge and review it. Best
/// effort: any gap here skips the review rather than failing the document.
async fn review_clean_merge(
    storage: &Storage,
    llm: &CompletionClient,
    settings: &SyncSettings,
    proposal: &DocumentPlan,
    document_id: &str,
    version_id: &str,
    usage: &mut docsteward_shared::TokenUsage,
) {
    let human_version = match storage.list_versions(document_id).await {
        Ok(versions) => versions
            .into_iter()
            .find(|version| version.change_source == ChangeSource::HumanEdited)
            .map(|version| version.content),
        Err(error) => {
            warn!(%error, "could not load versions for merge review");
            return;
        }
    };
    let Some(human_version) = human_version else {
        debug!("no human version recorded, skipping merge review");
        return;
    };
    let merged = match storage.get_document(document_id).await {
        Ok(Some(doc)) => doc.content,
        _ => return,
    };
    let incoming = normalize(&proposal.content);

    review::review_merge(
        storage,
        llm,
        &settings.prompts.reviewer,
        document_id,
        version_id,
        &human_version,
        &incoming,
        &merged,
        usage,
    )
    .await;
}

fn outcome_label(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Created { .. } => "created",
        ReconcileOutcome::Updated { .. } => "updated",
        ReconcileOutcome::MergedClean { .. } => "merged with human edits",
        ReconcileOutcome::Conflicted { .. } => "conflicted, needs review",
    }
}
