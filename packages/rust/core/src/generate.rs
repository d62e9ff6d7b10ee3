//! Content generation for stub proposals.
//!
//! Analysis sometimes returns a scope note instead of a full page, usually
//! when a batch ran out of output budget. Substantial content is used
//! verbatim; stubs are expanded in a dedicated call. An empty expansion
//! keeps the stub, so a later sync can try again.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use docsteward_llm::CompletionClient;
use docsteward_shared::{DocumentPlan, Result, TokenUsage};

use crate::consolidate::is_substantial;

#[derive(Debug, Deserialize)]
struct GeneratedPage {
    #[serde(default)]
    content: String,
}

/// Expand `plan.content` in place when it is a stub.
pub async fn generate_content(
    client: &CompletionClient,
    system_prompt: &str,
    plan: &mut DocumentPlan,
    usage: &mut TokenUsage,
) -> Result<()> {
    if is_substantial(&plan.content) {
        debug!(slug = %plan.slug, "content already substantial, skipping generation");
        return Ok(());
    }

    let mut user = format!(
        "Title: {}\nSlug: {}\n\nScope note:\n{}\n",
        plan.title, plan.slug, plan.content
    );
    if !plan.related_files.is_empty() {
        user.push_str("\nSource files in scope:\n");
        for file in &plan.related_files {
            user.push_str(&format!("- {file}\n"));
        }
    }
    if !plan.related_tables.is_empty() {
        user.push_str("\nDatabase tables in scope:\n");
        for table in &plan.related_tables {
            user.push_str(&format!("- {}\n", table.name));
        }
    }

    let structured = client
        .complete_structured::<GeneratedPage>("generate", system_prompt, &user, &page_schema())
        .await?;
    usage.add(&structured.usage);

    match structured.output {
        Some(page) if !page.content.trim().is_empty() => plan.content = page.content,
        _ => warn!(slug = %plan.slug, "generator returned no content, keeping stub"),
    }
    Ok(())
}

fn page_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Full markdown body with a single top-level heading."
            }
        },
        "required": ["content"],
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

    fn stub_plan() -> DocumentPlan {
        DocumentPlan {
            slug: "webhooks".into(),
            title: "Webhooks".into(),
            action: PlanAction::Create,
            content: "Cover webhook delivery and retries.".into(),
            related_files: vec!["src/webhooks.ts".into()],
            related_tables: vec![],
            category: None,
            conflict_notes: None,
        }
    }

    fn completion_body(content: &serde_json::Value) -> serde_json::Value {
        json!({
            "choices": [{ "message": { "content": content.to_string() } }],
            "usage": { "prompt_tokens": 60, "completion_tokens": 200 }
        })
    }

    #[tokio::test]
    async fn substantial_content_is_used_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        let mut plan = stub_plan();
        plan.content = "# Webhooks\n\n".to_string() + &"Delivery details. ".repeat(20);
        let original = plan.content.clone();

        let mut usage = TokenUsage::default();
        generate_content(&client, "sys", &mut plan, &mut usage).await.unwrap();
        assert_eq!(plan.content, original);
        assert_eq!(usage.prompt_tokens, 0);
    }

    #[tokio::test]
    async fn stub_is_expanded_from_the_scope_note() {
        let server = MockServer::start().await;
        let page = json!({ "content": "# Webhooks\n\nFull expanded body." });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("Cover webhook delivery"))
            .and(body_string_contains("src/webhooks.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&page)))
            .expect(1)
            .mount(&server)
            .await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        let mut plan = stub_plan();
        let mut usage = TokenUsage::default();
        generate_content(&client, "sys", &mut plan, &mut usage).await.unwrap();

        assert_eq!(plan.content, "# Webhooks\n\nFull expanded body.");
        assert_eq!(usage.completion_tokens, 200);
    }

    #[tokio::test]
    async fn empty_expansion_keeps_the_stub() {
        let server = MockServer::start().await;
        let page = json!({ "content": "   " });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&page)))
            .mount(&server)
            .await;
        let client = CompletionClient::new(&server.uri(), "key", "test-model").unwrap();

        let mut plan = stub_plan();
        let mut usage = TokenUsage::default();
        generate_content(&client, "sys", &mut plan, &mut usage).await.unwrap();

        assert_eq!(plan.content, "Cover webhook delivery and retries.");
    }
}
