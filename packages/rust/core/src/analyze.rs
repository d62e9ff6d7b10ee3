//! Content analysis: changed files in, document proposals out.
//!
//! Files are batched under a character and file budget, each batch goes to
//! the model with the category list and document index, and proposals are
//! merged across batches by slug with the later batch winning. A failed
//! batch degrades to no proposals instead of failing the run.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use docsteward_llm::CompletionClient;
use docsteward_shared::{DocumentPlan, TokenUsage};

/// Character budget per analysis batch.
pub const MAX_BATCH_CHARS: usize = 48_000;

/// File budget per analysis batch.
pub const MAX_BATCH_FILES: usize = 12;

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// One analysis call's worth of file contents.
#[derive(Debug, Clone)]
pub struct Batch {
    pub files: Vec<(String, String)>,
}

/// Clip content for a prompt, marking the cut.
pub(crate) fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}\n\n[... content truncated for LLM context window ...]")
}

/// Split files into batches under both budgets, preserving input order.
/// A single file over the character budget is truncated and batched alone.
pub fn build_batches(files: &[(String, String)]) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();
    let mut current_chars = 0usize;

    for (path, content) in files {
        let content = truncate_content(content, MAX_BATCH_CHARS);
        let chars = content.chars().count();
        if !current.is_empty()
            && (current.len() >= MAX_BATCH_FILES || current_chars + chars > MAX_BATCH_CHARS)
        {
            batches.push(Batch { files: std::mem::take(&mut current) });
            current_chars = 0;
        }
        current_chars += chars;
        current.push((path.clone(), content));
    }
    if !current.is_empty() {
        batches.push(Batch { files: current });
    }
    batches
}

// ---------------------------------------------------------------------------
// Analysis calls
// ---------------------------------------------------------------------------

/// Catalog context repeated in every analysis call.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    /// Known category names.
    pub categories: Vec<String>,
    /// `(slug, title)` index of existing documents.
    pub documents: Vec<(String, String)>,
    /// Scope line for the current planner group, when planning ran.
    pub group_scope: Option<String>,
    /// One-line descriptions of the sibling groups, when planning ran.
    pub sibling_groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    documents: Vec<DocumentPlan>,
}

/// Merge proposals by slug: the first occurrence keeps its position, the
/// last occurrence keeps its content.
pub fn merge_by_slug(plans: Vec<DocumentPlan>) -> Vec<DocumentPlan> {
    let mut merged: Vec<DocumentPlan> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for plan in plans {
        match index.get(&plan.slug) {
            Some(&at) => merged[at] = plan,
            None => {
                index.insert(plan.slug.clone(), merged.len());
                merged.push(plan);
            }
        }
    }
    merged
}

/// Run the analyzer over every batch and merge the proposals.
///
/// Failures are recorded in `errors` and skipped; proposals from healthy
/// batches survive.
pub async fn analyze_batches(
    client: &CompletionClient,
    system_prompt: &str,
    context: &AnalysisContext,
    batches: &[Batch],
    usage: &mut TokenUsage,
    errors: &mut Vec<String>,
) -> Vec<DocumentPlan> {
    let mut all: Vec<DocumentPlan> = Vec::new();

    for (i, batch) in batches.iter().enumerate() {
        let user = render_batch(context, batch);
        match client
            .complete_structured::<AnalysisResponse>("analyze", system_prompt, &user, &analysis_schema())
            .await
        {
            Ok(structured) => {
                usage.add(&structured.usage);
                let Some(response) = structured.output else {
                    debug!(batch = i, "analyzer produced no proposals");
                    continue;
                };
                for plan in response.documents {
                    if plan.slug.trim().is_empty() {
                        warn!(title = %plan.title, "dropping proposal without a slug");
                        continue;
                    }
                    all.push(plan);
                }
            }
            Err(error) => {
                warn!(batch = i, %error, "analysis batch failed");
                errors.push(format!("analysis batch {} failed: {error}", i + 1));
            }
        }
    }

    merge_by_slug(all)
}

fn render_batch(context: &AnalysisContext, batch: &Batch) -> String {
    let mut user = String::new();

    if let Some(scope) = &context.group_scope {
        user.push_str(&format!("Group scope: {scope}\n\n"));
    }
    if !context.sibling_groups.is_empty() {
        user.push_str("Groups handled separately (do not cover these):\n");
        for sibling in &context.sibling_groups {
            user.push_str(&format!("- {sibling}\n"));
        }
        user.push('\n');
    }
    if !context.categories.is_empty() {
        user.push_str("Categories:\n");
        for category in &context.categories {
            user.push_str(&format!("- {category}\n"));
        }
        user.push('\n');
    }
    if !context.documents.is_empty() {
        user.push_str("Existing documents:\n");
        for (slug, title) in &context.documents {
            user.push_str(&format!("- {slug}: {title}\n"));
        }
        user.push('\n');
    }

    user.push_str("Changed files:\n\n");
    for (path, content) in &batch.files {
        user.push_str(&format!("## {path}\n\n```\n{content}\n```\n\n"));
    }
    user
}

fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "documents": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "slug": {
                            "type": "string",
                            "description": "Stable kebab-case identifier. Reuse the slug of an existing document to update it."
                        },
                        "title": { "type": "string" },
                        "action": { "type": "string", "enum": ["create", "update"] },
                        "content": {
                            "type": "string",
                            "description": "Full markdown body with a single top-level heading."
                        },
                        "related_files": { "type": "array", "items": { "type": "string" } },
                        "related_tables": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "description": { "type": ["string", "null"] },
                                    "columns": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "properties": {
                                                "name": { "type": "string" },
                                                "description": { "type": ["string", "null"] }
                                            },
                                            "required": ["name", "description"],
                                            "additionalProperties": false
                                        }
                                    }
                                },
                                "required": ["name", "description", "columns"],
                                "additionalProperties": false
                            }
                        },
                        "category": { "type": ["string", "null"] },
                        "conflict_notes": { "type": ["string", "null"] }
                    },
                    "required": [
                        "slug", "title", "action", "content",
                        "related_files", "related_tables", "category", "conflict_notes"
                    ],
                    "additionalProperties": false
                }
            }
        },
        "required": ["documents"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use docsteward_shared::PlanAction;

    use super::*;

    fn file(path: &str, chars: usize) -> (String, String) {
        (path.to_string(), "x".repeat(chars))
    }

    #[test]
    fn batches_respect_the_file_budget() {
        let files: Vec<(String, String)> =
            (0..13).map(|i| file(&format!("f{i}.ts"), 10)).collect();
        let batches = build_batches(&files);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].files.len(), 12);
        assert_eq!(batches[1].files.len(), 1);
    }

    #[test]
    fn batches_respect_the_char_budget() {
        let files = vec![
            file("a.ts", 20_000),
            file("b.ts", 20_000),
            file("c.ts", 20_000),
        ];
        let batches = build_batches(&files);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].files.len(), 2);
        assert_eq!(batches[1].files.len(), 1);
    }

    #[test]
    fn oversized_file_is_truncated_and_batched_alone() {
        let files = vec![file("huge.ts", 60_000), file("tiny.ts", 10)];
        let batches = build_batches(&files);
        assert_eq!(batches.len(), 2);
        assert!(batches[0].files[0].1.contains("content truncated"));
        assert_eq!(batches[1].files[0].0, "tiny.ts");
    }

    #[test]
    fn merge_keeps_first_position_and_last_content() {
        let mk = |slug: &str, content: &str| DocumentPlan {
            slug: slug.into(),
            title: slug.into(),
            action: PlanAction::Create,
            content: content.into(),
            related_files: vec![],
            related_tables: vec![],
            category: None,
            conflict_notes: None,
        };
        let merged = merge_by_slug(vec![
            mk("auth", "first draft"),
            mk("billing", "billing"),
            mk("auth", "second draft"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].slug, "auth");
        assert_eq!(merged[0].content, "second draft");
        assert_eq!(merged[1].slug, "billing");
    }

    fn completion_body(content: &serde_json::Value) -> serde_json::Value {
        json!({
            "choices": [{ "message": { "content": content.to_string() } }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 40 }
        })
    }

    fn proposal_json(slug: &str, content: &str) -> serde_json::Value {
        json!({
            "documents": [{
                "slug": slug,
                "title": "Authentication",
                "action": "update",
                "content": content,
                "related_files": ["src/auth.ts"],
                "related_tables": [],
                "category": "Backend",
                "conflict_notes": null
            }]
        })
    }

    #[tokio::test]
    async fn later_batch_overrides_earlier_proposal() {
        let server = MockServer::start().await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("first-file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(&proposal_json("auth", "early draft"))),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("second-file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(&proposal_json("auth", "late draft"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let batches = vec![
            Batch { files: vec![("first-file.ts".into(), "a".into())] },
            Batch { files: vec![("second-file.ts".into(), "b".into())] },
        ];
        let mut usage = TokenUsage::default();
        let mut errors = Vec::new();
        let plans = analyze_batches(
            &client,
            "sys",
            &AnalysisContext::default(),
            &batches,
            &mut usage,
            &mut errors,
        )
        .await;

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].content, "late draft");
        assert_eq!(plans[0].action, PlanAction::Update);
        assert_eq!(usage.prompt_tokens, 200);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_degrades_to_other_batches() {
        let server = MockServer::start().await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        // Only the second batch has a mock; the first gets a permanent 404.
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("healthy-file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(&proposal_json("billing", "survived"))),
            )
            .mount(&server)
            .await;

        let batches = vec![
            Batch { files: vec![("broken-file.ts".into(), "a".into())] },
            Batch { files: vec![("healthy-file.ts".into(), "b".into())] },
        ];
        let mut usage = TokenUsage::default();
        let mut errors = Vec::new();
        let plans = analyze_batches(
            &client,
            "sys",
            &AnalysisContext::default(),
            &batches,
            &mut usage,
            &mut errors,
        )
        .await;

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].slug, "billing");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("analysis batch 1"));
    }

    #[tokio::test]
    async fn context_is_rendered_into_the_prompt() {
        let server = MockServer::start().await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("Group scope: Auth endpoints"))
            .and(body_string_contains("existing-doc"))
            .and(body_string_contains("Backend"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(&json!({ "documents": [] }))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let context = AnalysisContext {
            categories: vec!["Backend".into()],
            documents: vec![("existing-doc".into(), "Existing Doc".into())],
            group_scope: Some("Auth endpoints".into()),
            sibling_groups: vec!["Billing: invoices".into()],
        };
        let batches = vec![Batch { files: vec![("src/auth.ts".into(), "code".into())] }];
        let mut usage = TokenUsage::default();
        let mut errors = Vec::new();
        let plans =
            analyze_batches(&client, "sys", &context, &batches, &mut usage, &mut errors).await;

        assert!(plans.is_empty());
        assert!(errors.is_empty());
    }
}
