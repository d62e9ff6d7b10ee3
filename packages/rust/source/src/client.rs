//! Read-only client for a GitHub-style repository API.
//!
//! Two operations: a full recursive tree listing (path + blob hash) and raw
//! blob content by path. Writes never happen here; the pipeline treats the
//! repository as an external snapshot to diff against.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, header};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use docsteward_shared::{DocstewardError, Result, with_retry};

use crate::repo::RepoRef;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("DocSteward/", env!("CARGO_PKG_VERSION"));

/// Accept header that makes the contents endpoint return the raw blob.
const RAW_CONTENT_TYPE: &str = "application/vnd.github.raw+json";

/// Default fan-out for bulk blob fetches.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 5;

// ---------------------------------------------------------------------------
// Tree entries
// ---------------------------------------------------------------------------

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Repository-relative path.
    pub path: String,
    pub kind: EntryKind,
    /// Content hash of the blob (or subtree) as reported by the provider.
    pub hash: String,
    /// Size in bytes; absent for trees.
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<RawTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct RawTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    size: Option<u64>,
}

// ---------------------------------------------------------------------------
// SourceClient
// ---------------------------------------------------------------------------

/// HTTP client for one source provider endpoint.
#[derive(Clone)]
pub struct SourceClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    concurrency: usize,
}

impl SourceClient {
    /// Create a client for `base_url`, authenticating with `token` when given.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                DocstewardError::http(None, format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        })
    }

    /// Set the fan-out for bulk blob fetches.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch the full recursive file tree for `repo`.
    ///
    /// A truncated listing is a hard error: diffing against a partial
    /// snapshot would classify every missing file as removed.
    #[instrument(skip_all, fields(repo = %repo))]
    pub async fn fetch_tree(&self, repo: &RepoRef) -> Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.base_url, repo.owner, repo.repo, repo.branch
        );
        let response = self.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocstewardError::http(
                Some(status.as_u16()),
                format!("tree listing for {repo} failed"),
            ));
        }

        let listing: TreeResponse = response
            .json()
            .await
            .map_err(|e| DocstewardError::http(None, format!("malformed tree listing: {e}")))?;
        if listing.truncated {
            return Err(DocstewardError::validation(format!(
                "tree listing for {repo} is truncated; refusing to sync from a partial snapshot"
            )));
        }

        let entries: Vec<TreeEntry> = listing
            .tree
            .into_iter()
            .filter_map(|raw| {
                let kind = match raw.kind.as_str() {
                    "blob" => EntryKind::Blob,
                    "tree" => EntryKind::Tree,
                    // Submodule commits and the like carry no content.
                    _ => return None,
                };
                Some(TreeEntry {
                    path: raw.path,
                    kind,
                    hash: raw.sha,
                    size: raw.size,
                })
            })
            .collect();

        debug!(entries = entries.len(), "fetched file tree");
        Ok(entries)
    }

    /// Fetch the raw content of one file.
    ///
    /// Files larger than `max_bytes` return `Ok(None)` and are skipped by
    /// callers. Missing or forbidden paths are permanent errors.
    #[instrument(skip_all, fields(repo = %repo, path = %path))]
    pub async fn fetch_blob(
        &self,
        repo: &RepoRef,
        path: &str,
        max_bytes: u64,
    ) -> Result<Option<String>> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.base_url, repo.owner, repo.repo, path, repo.branch
        );
        let response = self
            .get(&url)
            .header(header::ACCEPT, RAW_CONTENT_TYPE)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocstewardError::http(
                Some(status.as_u16()),
                format!("blob fetch for {path} failed"),
            ));
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                debug!(bytes = len, max_bytes, "skipping oversized file");
                return Ok(None);
            }
        }
        let body = response
            .text()
            .await
            .map_err(|e| DocstewardError::http(None, format!("blob read for {path} failed: {e}")))?;
        if body.len() as u64 > max_bytes {
            debug!(bytes = body.len(), max_bytes, "skipping oversized file");
            return Ok(None);
        }
        Ok(Some(body))
    }

    /// Fetch many blobs with bounded fan-out, retrying transient failures
    /// per path. A path that fails permanently (or keeps failing) is skipped
    /// with a warning rather than aborting the batch. Results keep the input
    /// order, minus skipped paths.
    #[instrument(skip_all, fields(repo = %repo, paths = paths.len()))]
    pub async fn fetch_blobs(
        &self,
        repo: &RepoRef,
        paths: &[String],
        max_bytes: u64,
    ) -> Result<Vec<(String, String)>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(paths.len());

        for path in paths {
            let client = self.clone();
            let repo = repo.clone();
            let path = path.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| DocstewardError::http(None, format!("fetch pool closed: {e}")))?;
                let content =
                    with_retry("blob fetch", || client.fetch_blob(&repo, &path, max_bytes)).await?;
                Ok::<_, DocstewardError>((path, content))
            }));
        }

        let mut contents = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok((path, Some(content)))) => contents.push((path, content)),
                Ok(Ok((path, None))) => debug!(path, "file content skipped"),
                Ok(Err(e)) => warn!(error = %e, "failed to fetch file content"),
                Err(e) => warn!(error = %e, "fetch task failed"),
            }
        }
        Ok(contents)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

fn request_error(e: reqwest::Error) -> DocstewardError {
    DocstewardError::http(e.status().map(|s| s.as_u16()), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tree_json() -> serde_json::Value {
        serde_json::json!({
            "sha": "root0",
            "tree": [
                { "path": "src", "mode": "040000", "type": "tree", "sha": "t1" },
                { "path": "src/lib.rs", "mode": "100644", "type": "blob", "sha": "b1", "size": 420 },
                { "path": "src/api/routes.ts", "mode": "100644", "type": "blob", "sha": "b2", "size": 1337 },
                { "path": "vendored", "mode": "160000", "type": "commit", "sha": "c1" },
            ],
            "truncated": false
        })
    }

    #[tokio::test]
    async fn fetch_tree_lists_blobs_and_trees() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tree_json()))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), None).unwrap();
        let repo = RepoRef::parse("acme/widget").unwrap();
        let entries = client.fetch_tree(&repo).await.unwrap();

        // Submodule commit entries are dropped.
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, EntryKind::Tree);
        assert_eq!(
            entries[1],
            TreeEntry {
                path: "src/lib.rs".into(),
                kind: EntryKind::Blob,
                hash: "b1".into(),
                size: Some(420),
            }
        );
    }

    #[tokio::test]
    async fn fetch_tree_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/git/trees/main"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tree_json()))
            .expect(1)
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), Some("secret-token".into())).unwrap();
        let repo = RepoRef::parse("acme/widget").unwrap();
        client.fetch_tree(&repo).await.unwrap();
    }

    #[tokio::test]
    async fn truncated_tree_is_a_hard_error() {
        let server = MockServer::start().await;
        let body = serde_json::json!({ "sha": "r", "tree": [], "truncated": true });
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/git/trees/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), None).unwrap();
        let repo = RepoRef::parse("acme/widget").unwrap();
        let err = client.fetch_tree(&repo).await.unwrap_err();

        assert!(err.to_string().contains("truncated"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn fetch_blob_returns_raw_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/src/lib.rs"))
            .and(query_param("ref", "main"))
            .and(header("accept", RAW_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_string("pub fn answer() -> u32 { 42 }\n"))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), None).unwrap();
        let repo = RepoRef::parse("acme/widget").unwrap();
        let content = client.fetch_blob(&repo, "src/lib.rs", 65_536).await.unwrap();

        assert_eq!(content.as_deref(), Some("pub fn answer() -> u32 { 42 }\n"));
    }

    #[tokio::test]
    async fn oversized_blob_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(256)))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), None).unwrap();
        let repo = RepoRef::parse("acme/widget").unwrap();
        let content = client.fetch_blob(&repo, "big.bin", 64).await.unwrap();

        assert_eq!(content, None);
    }

    #[tokio::test]
    async fn missing_blob_is_a_permanent_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/gone.rs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), None).unwrap();
        let repo = RepoRef::parse("acme/widget").unwrap();
        let err = client.fetch_blob(&repo, "gone.rs", 65_536).await.unwrap_err();

        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn bulk_fetch_skips_failing_paths_and_keeps_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/a.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("export const a = 1;\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/missing.ts"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/b.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("export const b = 2;\n"))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), None)
            .unwrap()
            .with_concurrency(2);
        let repo = RepoRef::parse("acme/widget").unwrap();
        let paths = vec!["a.ts".to_string(), "missing.ts".to_string(), "b.ts".to_string()];
        let contents = client.fetch_blobs(&repo, &paths, 65_536).await.unwrap();

        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].0, "a.ts");
        assert_eq!(contents[1].0, "b.ts");
    }
}
