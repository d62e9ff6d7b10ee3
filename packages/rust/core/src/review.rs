//! Post-merge semantic review.
//!
//! Line-based merging can splice two individually sensible edits into a
//! page that contradicts itself. After every clean merge the three texts
//! go to the model, which returns annotations tied to section headings.
//! Strictly advisory: content is never modified, and every failure here is
//! logged and swallowed.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use docsteward_llm::CompletionClient;
use docsteward_shared::{Severity, TokenUsage};
use docsteward_storage::Storage;

/// Per-text snippet budget in the review prompt.
const REVIEW_SNIPPET_CHARS: usize = 16_000;

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    annotations: Vec<ProposedAnnotation>,
}

#[derive(Debug, Deserialize)]
struct ProposedAnnotation {
    section_heading: String,
    concern: String,
    severity: Severity,
}

/// Review a clean merge and persist any concerns as annotations bound to
/// the merged version. Returns the number recorded; never fails the sync.
#[instrument(skip_all, fields(document_id = %document_id))]
pub async fn review_merge(
    storage: &Storage,
    client: &CompletionClient,
    system_prompt: &str,
    document_id: &str,
    version_id: &str,
    human_version: &str,
    ai_version: &str,
    merged: &str,
    usage: &mut TokenUsage,
) -> usize {
    let user = format!(
        "Human-edited version:\n\n{}\n\n---\n\nAI proposal:\n\n{}\n\n---\n\nMerged result:\n\n{}\n",
        crate::analyze::truncate_content(human_version, REVIEW_SNIPPET_CHARS),
        crate::analyze::truncate_content(ai_version, REVIEW_SNIPPET_CHARS),
        crate::analyze::truncate_content(merged, REVIEW_SNIPPET_CHARS),
    );

    let structured = match client
        .complete_structured::<ReviewResponse>("review", system_prompt, &user, &review_schema())
        .await
    {
        Ok(structured) => structured,
        Err(error) => {
            warn!(%error, "merge review failed, keeping merge unreviewed");
            return 0;
        }
    };
    usage.add(&structured.usage);

    let Some(response) = structured.output else {
        debug!("merge review returned nothing");
        return 0;
    };

    let mut recorded = 0;
    for annotation in response.annotations {
        match storage
            .insert_annotation(
                document_id,
                Some(version_id),
                &annotation.section_heading,
                &annotation.concern,
                annotation.severity,
            )
            .await
        {
            Ok(_) => recorded += 1,
            Err(error) => warn!(%error, "failed to record review annotation"),
        }
    }

    if recorded > 0 {
        // Annotations make an otherwise terminal clean merge reviewable.
        if let Err(error) = storage.set_needs_review(document_id, true).await {
            warn!(%error, "failed to flag document for review");
        }
        info!(annotations = recorded, "merge review recorded concerns");
    }
    recorded
}

fn review_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "annotations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "section_heading": {
                            "type": "string",
                            "description": "Exact heading of the affected section."
                        },
                        "concern": { "type": "string" },
                        "severity": { "type": "string", "enum": ["info", "warning", "error"] }
                    },
                    "required": ["section_heading", "concern", "severity"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["annotations"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use chrono::Utc;
    use docsteward_shared::{ChangeSource, Document, new_id};

    use super::*;

    async fn storage_with_document() -> (Storage, String, String) {
        let db = std::env::temp_dir().join(format!("ds_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();

        let now = Utc::now();
        let doc = Document {
            id: new_id(),
            slug: "merged-doc".into(),
            title: "Merged Doc".into(),
            content: "# Merged\n\nBody.\n".into(),
            category_id: None,
            has_human_edits: true,
            needs_review: false,
            last_ai_generated_at: Some(now),
            last_human_edited_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        storage.insert_document(&doc).await.unwrap();
        let version_id = storage
            .insert_version(&doc.id, &doc.content, ChangeSource::AiMerged, None, None)
            .await
            .unwrap();
        (storage, doc.id, version_id)
    }

    fn completion_body(content: &serde_json::Value) -> serde_json::Value {
        json!({
            "choices": [{ "message": { "content": content.to_string() } }],
            "usage": { "prompt_tokens": 70, "completion_tokens": 25 }
        })
    }

    #[tokio::test]
    async fn annotations_are_persisted_against_the_version() {
        let (storage, document_id, version_id) = storage_with_document().await;
        let server = MockServer::start().await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        let response = json!({
            "annotations": [
                {
                    "section_heading": "## Rate limits",
                    "concern": "The merged text states both 100 and 500 requests per minute.",
                    "severity": "error"
                },
                {
                    "section_heading": "## Setup",
                    "concern": "Mentions an environment variable the AI version removed.",
                    "severity": "warning"
                }
            ]
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&response)))
            .expect(1)
            .mount(&server)
            .await;

        let mut usage = TokenUsage::default();
        let recorded = review_merge(
            &storage,
            &client,
            "sys",
            &document_id,
            &version_id,
            "human text",
            "ai text",
            "merged text",
            &mut usage,
        )
        .await;

        assert_eq!(recorded, 2);
        let annotations = storage.list_annotations(&document_id).await.unwrap();
        assert_eq!(annotations.len(), 2);
        assert!(annotations.iter().any(|a| a.severity == Severity::Error));
        assert!(annotations.iter().all(|a| a.version_id.as_deref() == Some(version_id.as_str())));

        let doc = storage.get_document(&document_id).await.unwrap().unwrap();
        assert!(doc.needs_review);
        assert_eq!(usage.prompt_tokens, 70);
    }

    #[tokio::test]
    async fn review_failure_is_swallowed() {
        let (storage, document_id, version_id) = storage_with_document().await;
        let server = MockServer::start().await;
        // No mock: permanent 404 from the completion endpoint.
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        let mut usage = TokenUsage::default();
        let recorded = review_merge(
            &storage,
            &client,
            "sys",
            &document_id,
            &version_id,
            "human",
            "ai",
            "merged",
            &mut usage,
        )
        .await;

        assert_eq!(recorded, 0);
        assert!(storage.list_annotations(&document_id).await.unwrap().is_empty());
        let doc = storage.get_document(&document_id).await.unwrap().unwrap();
        assert!(!doc.needs_review);
    }

    #[tokio::test]
    async fn clean_review_records_nothing() {
        let (storage, document_id, version_id) = storage_with_document().await;
        let server = MockServer::start().await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        let response = json!({ "annotations": [] });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&response)))
            .mount(&server)
            .await;

        let mut usage = TokenUsage::default();
        let recorded = review_merge(
            &storage,
            &client,
            "sys",
            &document_id,
            &version_id,
            "human",
            "ai",
            "merged",
            &mut usage,
        )
        .await;

        assert_eq!(recorded, 0);
        let doc = storage.get_document(&document_id).await.unwrap().unwrap();
        assert!(!doc.needs_review);
    }
}
