//! Draft consolidation: collapse same-topic proposals before they land.
//!
//! Independent analysis batches can each propose a document about the same
//! topic. Substantial drafts sharing a category go to the model in pairs or
//! larger groups, which either merges them into one document or keeps them
//! separate with tightened titles. Any failure keeps the original drafts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use docsteward_llm::CompletionClient;
use docsteward_shared::{
    DocstewardError, DocumentPlan, PlanAction, RelatedTable, Result, TokenUsage,
};

/// Drafts shorter than this are stubs and never consolidated.
pub const MIN_SUBSTANTIAL_CONTENT: usize = 100;

/// Draft body snippet length in the consolidation prompt.
const DRAFT_SNIPPET_CHARS: usize = 8_000;

/// Whether a draft body is substantial rather than a stub.
pub(crate) fn is_substantial(content: &str) -> bool {
    content.chars().count() >= MIN_SUBSTANTIAL_CONTENT
}

#[derive(Debug, Deserialize)]
struct ConsolidationResponse {
    decision: String,
    #[serde(default)]
    merged: Option<MergedDraft>,
    #[serde(default)]
    documents: Vec<RefreshedDraft>,
}

#[derive(Debug, Deserialize)]
struct MergedDraft {
    title: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RefreshedDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// Consolidate same-category drafts, bounded by `concurrency` parallel
/// model calls. Stubs and singleton categories pass through untouched; a
/// failed group falls back to its original drafts.
pub async fn consolidate_plans(
    client: &CompletionClient,
    system_prompt: &str,
    plans: Vec<DocumentPlan>,
    concurrency: usize,
    usage: &mut TokenUsage,
    errors: &mut Vec<String>,
) -> Vec<DocumentPlan> {
    // Candidate groups: two or more substantial drafts sharing a category.
    let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, plan) in plans.iter().enumerate() {
        if is_substantial(&plan.content) {
            by_category
                .entry(plan.category.clone().unwrap_or_default())
                .or_default()
                .push(i);
        }
    }
    by_category.retain(|_, members| members.len() >= 2);

    if by_category.is_empty() {
        return plans;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(by_category.len());
    for (key, members) in &by_category {
        let client = client.clone();
        let system = system_prompt.to_string();
        let semaphore = Arc::clone(&semaphore);
        let key = key.clone();
        let group: Vec<DocumentPlan> = members.iter().map(|&i| plans[i].clone()).collect();

        handles.push(tokio::spawn(async move {
            let result = async {
                let _permit = semaphore.acquire().await.map_err(|e| {
                    DocstewardError::validation(format!("consolidation pool closed: {e}"))
                })?;
                review_group(&client, &system, &key, &group).await
            }
            .await;
            (key, result)
        }));
    }

    let mut replacements: HashMap<String, Vec<DocumentPlan>> = HashMap::new();
    for handle in handles {
        match handle.await {
            Ok((key, Ok((decision, call_usage)))) => {
                usage.add(&call_usage);
                match decision {
                    Some(replacement) => {
                        replacements.insert(key, replacement);
                    }
                    None => debug!(category = %key, "consolidator declined, keeping drafts"),
                }
            }
            Ok((key, Err(error))) => {
                warn!(category = %key, %error, "consolidation failed, keeping drafts");
                errors.push(format!("consolidation for category {key:?} failed: {error}"));
            }
            Err(error) => {
                warn!(%error, "consolidation task failed");
                errors.push(format!("consolidation task failed: {error}"));
            }
        }
    }

    // Reassemble in input order: the first member of a consolidated group
    // stands in for the whole group, later members are dropped, and
    // everything else keeps its position.
    let member_of: HashMap<usize, String> = by_category
        .iter()
        .filter(|(key, _)| replacements.contains_key(key.as_str()))
        .flat_map(|(key, members)| members.iter().map(move |&i| (i, key.clone())))
        .collect();

    let mut out: Vec<DocumentPlan> = Vec::with_capacity(plans.len());
    let mut emitted: HashSet<String> = HashSet::new();
    for (i, plan) in plans.into_iter().enumerate() {
        match member_of.get(&i) {
            None => out.push(plan),
            Some(key) => {
                if emitted.insert(key.clone()) {
                    if let Some(replacement) = replacements.remove(key) {
                        out.extend(replacement);
                    }
                }
            }
        }
    }
    out
}

async fn review_group(
    client: &CompletionClient,
    system_prompt: &str,
    category: &str,
    group: &[DocumentPlan],
) -> Result<(Option<Vec<DocumentPlan>>, TokenUsage)> {
    let label = if category.is_empty() { "(uncategorized)" } else { category };
    let mut user = format!(
        "Category: {label}\n\n{} drafts landed in this category in one sync.\n\n",
        group.len()
    );
    for (i, plan) in group.iter().enumerate() {
        let action = match plan.action {
            PlanAction::Create => "create",
            PlanAction::Update => "update",
        };
        user.push_str(&format!(
            "### Draft {}: {} (slug: {}, action: {action})\n\n{}\n\n",
            i + 1,
            plan.title,
            plan.slug,
            crate::analyze::truncate_content(&plan.content, DRAFT_SNIPPET_CHARS),
        ));
    }

    let structured = client
        .complete_structured::<ConsolidationResponse>(
            "consolidate",
            system_prompt,
            &user,
            &consolidation_schema(),
        )
        .await?;
    let usage = structured.usage;
    let Some(response) = structured.output else {
        return Ok((None, usage));
    };
    Ok((apply_decision(group, response, category), usage))
}

fn apply_decision(
    group: &[DocumentPlan],
    response: ConsolidationResponse,
    category: &str,
) -> Option<Vec<DocumentPlan>> {
    match response.decision.as_str() {
        "merge" => {
            let merged = response.merged?;
            Some(vec![merge_members(group, merged, category)])
        }
        "keep_separate" => {
            let mut kept = group.to_vec();
            for (plan, refreshed) in kept.iter_mut().zip(response.documents) {
                if !refreshed.title.trim().is_empty() {
                    plan.title = refreshed.title;
                }
                if !refreshed.content.trim().is_empty() {
                    plan.content = refreshed.content;
                }
            }
            Some(kept)
        }
        other => {
            warn!(decision = other, "unknown consolidation decision, keeping drafts");
            None
        }
    }
}

/// Fold group members into one plan around the model's merged body.
///
/// The slug comes from an update member so the merge lands on the existing
/// document; with only creates, the shortest slug wins. File links are
/// unioned in order; tables are unioned by name, columns by name within
/// them, keeping the first description seen.
fn merge_members(group: &[DocumentPlan], merged: MergedDraft, category: &str) -> DocumentPlan {
    let slug = group
        .iter()
        .find(|plan| plan.action == PlanAction::Update)
        .map(|plan| plan.slug.clone())
        .or_else(|| {
            group
                .iter()
                .map(|plan| plan.slug.clone())
                .min_by_key(|slug| (slug.len(), slug.clone()))
        })
        .unwrap_or_default();
    let action = if group.iter().any(|plan| plan.action == PlanAction::Update) {
        PlanAction::Update
    } else {
        PlanAction::Create
    };

    let mut related_files: Vec<String> = Vec::new();
    for plan in group {
        for file in &plan.related_files {
            if !related_files.contains(file) {
                related_files.push(file.clone());
            }
        }
    }

    let mut related_tables: Vec<RelatedTable> = Vec::new();
    for plan in group {
        for table in &plan.related_tables {
            match related_tables.iter_mut().find(|t| t.name == table.name) {
                Some(existing) => {
                    if existing.description.is_none() {
                        existing.description = table.description.clone();
                    }
                    for column in &table.columns {
                        match existing.columns.iter_mut().find(|c| c.name == column.name) {
                            Some(known) => {
                                if known.description.is_none() {
                                    known.description = column.description.clone();
                                }
                            }
                            None => existing.columns.push(column.clone()),
                        }
                    }
                }
                None => related_tables.push(table.clone()),
            }
        }
    }

    let notes: Vec<&str> = group
        .iter()
        .filter_map(|plan| plan.conflict_notes.as_deref())
        .collect();
    let conflict_notes = if notes.is_empty() { None } else { Some(notes.join("; ")) };

    DocumentPlan {
        slug,
        title: merged.title,
        action,
        content: merged.content,
        related_files,
        related_tables,
        category: if category.is_empty() { None } else { Some(category.to_string()) },
        conflict_notes,
    }
}

fn consolidation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "decision": { "type": "string", "enum": ["merge", "keep_separate"] },
            "merged": {
                "type": ["object", "null"],
                "description": "The single merged document, required when decision is merge.",
                "properties": {
                    "title": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["title", "content"],
                "additionalProperties": false
            },
            "documents": {
                "type": "array",
                "description": "Refreshed drafts in input order, used when decision is keep_separate.",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["title", "content"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["decision", "merged", "documents"],
        "additionalProperties": false
    })
}
