//! Structured LLM completions over an OpenAI-compatible chat API.
//!
//! One operation: send a system/user prompt pair with a JSON schema and get
//! back typed output plus token usage. A model that returns nothing, or
//! something that does not match the schema, yields an empty result rather
//! than an error; callers treat "no output" as "no proposals".

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use docsteward_shared::{DocstewardError, Result, TokenUsage, with_retry};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("DocSteward/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types (OpenAI chat-completions shape)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    /// Dollar cost, when the provider reports one.
    cost: Option<f64>,
}

// ---------------------------------------------------------------------------
// Structured results
// ---------------------------------------------------------------------------

/// A structured completion: the typed output, when the model produced one
/// that matches the schema, plus token usage for run accounting.
#[derive(Debug)]
pub struct Structured<T> {
    pub output: Option<T>,
    pub usage: TokenUsage,
}

// ---------------------------------------------------------------------------
// CompletionClient
// ---------------------------------------------------------------------------

/// Client for one OpenAI-compatible completion endpoint and model.
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl CompletionClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| {
                DocstewardError::http(None, format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// The model identifier requests are sent with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request structured output conforming to `schema`.
    ///
    /// `task` names the call in logs and in the schema envelope; it must be
    /// a short identifier. Transport failures are retried; an answer that
    /// cannot be parsed as `T` comes back as `output: None`.
    #[instrument(skip_all, fields(task = %task, model = %self.model))]
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        task: &str,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<Structured<T>> {
        let response = with_retry(task, || self.send(task, system, user, schema)).await?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                cost: u.cost.unwrap_or(0.0),
            })
            .unwrap_or_default();

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            debug!("model returned no content");
            return Ok(Structured { output: None, usage });
        }

        let output = match serde_json::from_str::<T>(content.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "structured output did not match schema; treating as empty");
                None
            }
        };
        Ok(Structured { output, usage })
    }

    async fn send(
        &self,
        task: &str,
        system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<ChatResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: task,
                    strict: true,
                    schema,
                },
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocstewardError::http(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DocstewardError::http(
                Some(status.as_u16()),
                format!("completion request failed: {}", snippet(&body)),
            ));
        }

        response.json().await.map_err(|e| {
            DocstewardError::http(None, format!("malformed completion response: {e}"))
        })
    }
}

/// First ~200 chars of an error body, cut on a char boundary.
fn snippet(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
