//! Batched one-line file summaries.
//!
//! Large change sets are planned from summaries rather than full contents,
//! so summaries are produced first, in batches, and cached by content hash.
//! A file whose content has not changed never hits the model twice, across
//! runs and across prompt retries alike.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use docsteward_llm::CompletionClient;
use docsteward_shared::{Result, TokenUsage};
use docsteward_storage::Storage;

/// Files per summary call.
const SUMMARY_BATCH_FILES: usize = 16;

/// Per-file content snippet sent to the summarizer.
const SUMMARY_SNIPPET_CHARS: usize = 2_000;

/// Cache task label in `llm_cache`.
const SUMMARY_TASK: &str = "summarize";

/// Max length of a fallback summary taken from the file itself.
const FALLBACK_SUMMARY_CHARS: usize = 120;

#[derive(Debug, Deserialize)]
struct SummaryBatch {
    #[serde(default)]
    summaries: Vec<FileSummary>,
}

#[derive(Debug, Deserialize)]
struct FileSummary {
    path: String,
    summary: String,
}

/// Produce a one-line summary for every file, model-backed where possible.
///
/// Cached summaries are reused by content hash. Files the model fails to
/// cover fall back to their first content line, so the planner always sees
/// a complete map.
pub async fn summarize_files(
    storage: &Storage,
    client: &CompletionClient,
    system_prompt: &str,
    files: &[(String, String)],
    usage: &mut TokenUsage,
) -> Result<HashMap<String, String>> {
    let mut summaries: HashMap<String, String> = HashMap::new();
    let mut misses: Vec<&(String, String)> = Vec::new();

    for file in files {
        let (path, content) = file;
        let hash = content_hash(content);
        match storage
            .get_cached_completion(SUMMARY_TASK, &hash, client.model())
            .await?
        {
            Some(cached) => {
                summaries.insert(path.clone(), cached);
            }
            None => misses.push(file),
        }
    }

    let cache_hits = summaries.len();

    for batch in misses.chunks(SUMMARY_BATCH_FILES) {
        let user = render_batch(batch);
        match client
            .complete_structured::<SummaryBatch>(SUMMARY_TASK, system_prompt, &user, &summary_schema())
            .await
        {
            Ok(structured) => {
                usage.add(&structured.usage);
                let mut by_path: HashMap<String, String> = structured
                    .output
                    .map(|batch| {
                        batch
                            .summaries
                            .into_iter()
                            .map(|s| (s.path, s.summary))
                            .collect()
                    })
                    .unwrap_or_default();

                for (path, content) in batch {
                    match by_path.remove(path.as_str()) {
                        Some(summary) => {
                            let hash = content_hash(content);
                            if let Err(error) = storage
                                .put_cached_completion(SUMMARY_TASK, &hash, client.model(), &summary)
                                .await
                            {
                                warn!(%error, "failed to cache summary");
                            }
                            summaries.insert(path.clone(), summary);
                        }
                        None => {
                            debug!(path, "summarizer skipped file, using first line");
                            summaries.insert(path.clone(), fallback_summary(content));
                        }
                    }
                }
            }
            Err(error) => {
                warn!(%error, files = batch.len(), "summary batch failed, using first lines");
                for (path, content) in batch {
                    summaries.insert(path.clone(), fallback_summary(content));
                }
            }
        }
    }

    debug!(
        total = files.len(),
        cache_hits,
        "file summaries ready"
    );
    Ok(summaries)
}

fn render_batch(batch: &[&(String, String)]) -> String {
    let mut user = String::from("Summarize each of these files in one line.\n\n");
    for (path, content) in batch {
        user.push_str(&format!(
            "## {path}\n\n{}\n\n",
            crate::analyze::truncate_content(content, SUMMARY_SNIPPET_CHARS)
        ));
    }
    user
}

fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summaries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "summary": { "type": "string" }
                    },
                    "required": ["path", "summary"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["summaries"],
        "additionalProperties": false
    })
}

/// Hex SHA-256 of file content, the cache key component.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First non-empty content line, clipped to a summary-sized length.
fn fallback_summary(content: &str) -> String {
    let line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim();
    if line.chars().count() <= FALLBACK_SUMMARY_CHARS {
        return line.to_string();
    }
    let clipped: String = line.chars().take(FALLBACK_SUMMARY_CHARS).collect();
    format!("{clipped}...")
}
