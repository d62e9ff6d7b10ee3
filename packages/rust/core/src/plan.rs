//! Planning stage for large change sets.
//!
//! When a sync touches more files than fit one analysis pass, the change
//! set is compressed into directory buckets, the model proposes topic
//! groups over those buckets, and the groups are expanded back to concrete
//! files. Small change sets skip this stage entirely.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use docsteward_llm::CompletionClient;
use docsteward_shared::{Result, TokenUsage};

use crate::detect::is_content_included;

/// Buckets with fewer files than this merge into their parent directory.
pub const MIN_BUCKET_FILES: usize = 3;

/// Buckets with more files than this split by the next path segment.
pub const MAX_BUCKET_FILES: usize = 30;

/// Exemplar files listed per bucket in the planner prompt.
pub const KEY_FILES_PER_BUCKET: usize = 5;

// ---------------------------------------------------------------------------
// Directory buckets
// ---------------------------------------------------------------------------

/// A directory-level bucket of file summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Directory prefix; empty for the repository root.
    pub dir: String,
    /// `(path, summary)` pairs under this directory.
    pub files: Vec<(String, String)>,
}

impl Bucket {
    /// Up to five exemplar files, richest summaries first.
    pub fn key_files(&self) -> Vec<&(String, String)> {
        let mut sorted: Vec<&(String, String)> = self.files.iter().collect();
        sorted.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(KEY_FILES_PER_BUCKET);
        sorted
    }
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.matches('/').count() + 1
    }
}

/// First directory segment of `path` below `dir`, if the file sits in a
/// subdirectory rather than directly in `dir`.
fn next_segment(path: &str, dir: &str) -> Option<String> {
    let rest = if dir.is_empty() {
        path
    } else {
        path.strip_prefix(dir)?.strip_prefix('/')?
    };
    rest.split_once('/').map(|(segment, _)| segment.to_string())
}

fn split_bucket(bucket: Bucket) -> Vec<Bucket> {
    if bucket.files.len() <= MAX_BUCKET_FILES {
        return vec![bucket];
    }

    let mut direct: Vec<(String, String)> = Vec::new();
    let mut by_segment: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for (path, summary) in bucket.files {
        match next_segment(&path, &bucket.dir) {
            Some(segment) => by_segment.entry(segment).or_default().push((path, summary)),
            None => direct.push((path, summary)),
        }
    }

    if by_segment.is_empty() {
        // Every file sits directly in this directory; nothing to split by.
        return vec![Bucket { dir: bucket.dir, files: direct }];
    }

    let mut out = Vec::new();
    if !direct.is_empty() {
        out.push(Bucket { dir: bucket.dir.clone(), files: direct });
    }
    for (segment, files) in by_segment {
        let dir = if bucket.dir.is_empty() {
            segment
        } else {
            format!("{}/{segment}", bucket.dir)
        };
        out.extend(split_bucket(Bucket { dir, files }));
    }
    out
}

/// Compress `(path, summary)` pairs into directory buckets sized for the
/// planner prompt: group by immediate parent, merge thin buckets upward,
/// split oversized ones by their next path segment.
pub fn compress_buckets(files: &[(String, String)]) -> Vec<Bucket> {
    let mut by_dir: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for (path, summary) in files {
        by_dir
            .entry(parent_dir(path))
            .or_default()
            .push((path.clone(), summary.clone()));
    }

    // Merge thin buckets into their parents, deepest first, until stable.
    // Merging can leave a freshly created parent thin too, so re-scan.
    loop {
        let candidate = by_dir
            .iter()
            .filter(|(dir, files)| !dir.is_empty() && files.len() < MIN_BUCKET_FILES)
            .max_by_key(|(dir, _)| depth(dir))
            .map(|(dir, _)| dir.clone());
        let Some(dir) = candidate else { break };
        let files = by_dir.remove(&dir).unwrap_or_default();
        by_dir.entry(parent_dir(&dir)).or_default().extend(files);
    }

    let mut buckets = Vec::new();
    for (dir, files) in by_dir {
        if files.is_empty() {
            continue;
        }
        buckets.extend(split_bucket(Bucket { dir, files }));
    }
    for bucket in &mut buckets {
        bucket.files.sort();
    }
    buckets.sort_by(|a, b| a.dir.cmp(&b.dir));
    buckets
}

// ---------------------------------------------------------------------------
// Planner call
// ---------------------------------------------------------------------------

/// A topic group proposed by the planner.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Directory patterns the group claims.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Document ideas sketched for this group.
    #[serde(default)]
    pub proposed_documents: Vec<String>,
}

/// Planner output before expansion to concrete files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub groups: Vec<PlannedGroup>,
    /// Infrastructure directories used as read-only context.
    #[serde(default)]
    pub shared_context: Vec<String>,
}

/// Ask the model to group the change set. `None` means the model declined
/// to answer; the caller falls back to unplanned analysis either way.
pub async fn plan_groups(
    client: &CompletionClient,
    system_prompt: &str,
    buckets: &[Bucket],
    linked_documents: &[(String, String)],
    usage: &mut TokenUsage,
) -> Result<Option<PlanResponse>> {
    let mut user = String::from("Changed directories:\n\n");
    for bucket in buckets {
        let dir = if bucket.dir.is_empty() { "(repo root)" } else { &bucket.dir };
        user.push_str(&format!("### {dir} ({} files)\n", bucket.files.len()));
        for (path, summary) in bucket.key_files() {
            user.push_str(&format!("- {path}: {summary}\n"));
        }
        user.push('\n');
    }
    if !linked_documents.is_empty() {
        user.push_str("Existing documents already linked to changed files:\n");
        for (slug, title) in linked_documents {
            user.push_str(&format!("- {slug}: {title}\n"));
        }
    }

    let structured = client
        .complete_structured::<PlanResponse>("plan", system_prompt, &user, &plan_schema())
        .await?;
    usage.add(&structured.usage);
    Ok(structured.output)
}

fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "groups": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "patterns": { "type": "array", "items": { "type": "string" } },
                        "proposed_documents": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["name", "description", "patterns", "proposed_documents"],
                    "additionalProperties": false
                }
            },
            "shared_context": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["groups", "shared_context"],
        "additionalProperties": false
    })
}

// ---------------------------------------------------------------------------
// Group expansion
// ---------------------------------------------------------------------------

/// A planner group expanded to concrete files.
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub name: String,
    pub description: String,
    pub proposed_documents: Vec<String>,
    pub files: Vec<(String, String)>,
}

/// The expanded plan: analysis groups plus read-only shared context.
#[derive(Debug, Clone, Default)]
pub struct ExpandedPlan {
    pub groups: Vec<FileGroup>,
    pub shared_context: Vec<(String, String)>,
}

/// Expand planner patterns back to concrete files.
///
/// Files are claimed by the first group whose pattern matches, then by the
/// shared-context patterns. A file no pattern claims follows its closest
/// neighbor: the already assigned file sharing the longest path prefix.
/// Every input file lands somewhere; nothing is dropped.
pub fn expand_groups(plan: &PlanResponse, files: &[(String, String)]) -> ExpandedPlan {
    if plan.groups.is_empty() {
        return ExpandedPlan {
            groups: Vec::new(),
            shared_context: files.to_vec(),
        };
    }

    let mut groups: Vec<FileGroup> = plan
        .groups
        .iter()
        .map(|group| FileGroup {
            name: group.name.clone(),
            description: group.description.clone(),
            proposed_documents: group.proposed_documents.clone(),
            files: Vec::new(),
        })
        .collect();
    let mut shared: Vec<(String, String)> = Vec::new();
    let mut unmatched: Vec<(String, String)> = Vec::new();

    'files: for (path, summary) in files {
        for (i, group) in plan.groups.iter().enumerate() {
            if group
                .patterns
                .iter()
                .any(|pattern| is_content_included(path, std::slice::from_ref(pattern)))
            {
                groups[i].files.push((path.clone(), summary.clone()));
                continue 'files;
            }
        }
        if plan
            .shared_context
            .iter()
            .any(|pattern| is_content_included(path, std::slice::from_ref(pattern)))
        {
            shared.push((path.clone(), summary.clone()));
            continue;
        }
        unmatched.push((path.clone(), summary.clone()));
    }

    for (path, summary) in unmatched {
        let mut best = (0usize, 0usize); // (group index, shared segments)
        for (i, group) in groups.iter().enumerate() {
            for (assigned, _) in &group.files {
                let shared_segments = common_segments(&path, assigned);
                if shared_segments > best.1 {
                    best = (i, shared_segments);
                }
            }
        }
        groups[best.0].files.push((path, summary));
    }

    ExpandedPlan {
        groups: groups.into_iter().filter(|group| !group.files.is_empty()).collect(),
        shared_context: shared,
    }
}

fn common_segments(a: &str, b: &str) -> usize {
    a.split('/')
        .zip(b.split('/'))
        .take_while(|(x, y)| x == y)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<(String, String)> {
        paths
            .iter()
            .map(|p| (p.to_string(), format!("summary of {p}")))
            .collect()
    }

    #[test]
    fn thin_bucket_merges_into_parent() {
        let input = files(&[
            "api/auth/login.ts",
            "api/auth/logout.ts",
            "api/routes.ts",
            "api/server.ts",
            "api/middleware.ts",
        ]);
        let buckets = compress_buckets(&input);

        // api/auth has only 2 files, so it folds into api.
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].dir, "api");
        assert_eq!(buckets[0].files.len(), 5);
    }

    #[test]
    fn merge_cascades_through_thin_parents() {
        let input = files(&["a/b/c/one.ts", "a/b/c/two.ts"]);
        let buckets = compress_buckets(&input);

        // a/b/c -> a/b -> a -> root, each level too thin to stand alone.
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].dir, "");
        assert_eq!(buckets[0].files.len(), 2);
    }

    #[test]
    fn root_files_stay_in_the_root_bucket() {
        let input = files(&["README.md", "schema.sql"]);
        let buckets = compress_buckets(&input);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].dir, "");
    }

    #[test]
    fn oversized_bucket_splits_by_next_segment() {
        // Ten modules of two files each fold into svc, which then exceeds
        // the cap and splits back out, plus fifteen files directly in svc.
        let mut paths: Vec<String> = Vec::new();
        for module in 0..10 {
            paths.push(format!("svc/m{module}/a.ts"));
            paths.push(format!("svc/m{module}/b.ts"));
        }
        for i in 0..15 {
            paths.push(format!("svc/direct{i}.ts"));
        }
        let input: Vec<(String, String)> =
            paths.iter().map(|p| (p.clone(), String::new())).collect();

        let buckets = compress_buckets(&input);
        assert!(buckets.len() >= 2, "expected a split, got {buckets:?}");

        let direct = buckets.iter().find(|b| b.dir == "svc").unwrap();
        assert_eq!(direct.files.len(), 15);
        assert!(buckets.iter().any(|b| b.dir == "svc/m0"));

        let total: usize = buckets.iter().map(|b| b.files.len()).sum();
        assert_eq!(total, 35);
    }

    #[test]
    fn flat_oversized_directory_stays_whole() {
        let paths: Vec<(String, String)> = (0..40)
            .map(|i| (format!("flat/f{i}.ts"), String::new()))
            .collect();
        let buckets = compress_buckets(&paths);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].files.len(), 40);
    }

    #[test]
    fn key_files_prefers_rich_summaries() {
        let bucket = Bucket {
            dir: "api".into(),
            files: vec![
                ("api/a.ts".into(), "short".into()),
                ("api/b.ts".into(), "a much longer and more descriptive summary".into()),
                ("api/c.ts".into(), "medium length summary".into()),
                ("api/d.ts".into(), "tiny".into()),
                ("api/e.ts".into(), "another medium one".into()),
                ("api/f.ts".into(), "x".into()),
                ("api/g.ts".into(), "y".into()),
            ],
        };
        let key = bucket.key_files();
        assert_eq!(key.len(), KEY_FILES_PER_BUCKET);
        assert_eq!(key[0].0, "api/b.ts");
    }

    #[test]
    fn expansion_assigns_every_file_exactly_once() {
        let plan = PlanResponse {
            groups: vec![
                PlannedGroup {
                    name: "Auth".into(),
                    description: "Authentication".into(),
                    patterns: vec!["api/auth".into()],
                    proposed_documents: vec![],
                },
                PlannedGroup {
                    name: "Billing".into(),
                    description: "Billing".into(),
                    patterns: vec!["api/billing".into()],
                    proposed_documents: vec![],
                },
            ],
            shared_context: vec!["lib".into()],
        };
        let input = files(&[
            "api/auth/login.ts",
            "api/billing/invoice.ts",
            "lib/util.ts",
            "api/auth/session.ts",
        ]);

        let expanded = expand_groups(&plan, &input);
        assert_eq!(expanded.groups.len(), 2);
        assert_eq!(expanded.groups[0].files.len(), 2);
        assert_eq!(expanded.groups[1].files.len(), 1);
        assert_eq!(expanded.shared_context.len(), 1);

        let total: usize = expanded.groups.iter().map(|g| g.files.len()).sum();
        assert_eq!(total + expanded.shared_context.len(), input.len());
    }

    #[test]
    fn unmatched_file_follows_its_closest_neighbor() {
        let plan = PlanResponse {
            groups: vec![
                PlannedGroup {
                    name: "Auth".into(),
                    description: String::new(),
                    patterns: vec!["api/auth".into()],
                    proposed_documents: vec![],
                },
                PlannedGroup {
                    name: "Storage".into(),
                    description: String::new(),
                    patterns: vec!["db".into()],
                    proposed_documents: vec![],
                },
            ],
            shared_context: vec![],
        };
        // api/tokens.ts matches nothing; api/auth/login.ts shares the
        // "api" segment with it, db/pool.ts shares none.
        let input = files(&["api/auth/login.ts", "db/pool.ts", "api/tokens.ts"]);

        let expanded = expand_groups(&plan, &input);
        let auth = expanded.groups.iter().find(|g| g.name == "Auth").unwrap();
        assert!(auth.files.iter().any(|(p, _)| p == "api/tokens.ts"));
    }

    #[test]
    fn empty_plan_pushes_everything_to_shared_context() {
        let plan = PlanResponse::default();
        let input = files(&["a.ts", "b.ts"]);
        let expanded = expand_groups(&plan, &input);
        assert!(expanded.groups.is_empty());
        assert_eq!(expanded.shared_context.len(), 2);
    }

    #[test]
    fn plan_response_deserializes_from_model_json() {
        let raw = r#"{
            "groups": [
                {
                    "name": "HTTP API",
                    "description": "Route handlers and middleware",
                    "patterns": ["api"],
                    "proposed_documents": ["API overview"]
                }
            ],
            "shared_context": ["lib/logging"]
        }"#;
        let plan: PlanResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].patterns, vec!["api"]);
        assert_eq!(plan.shared_context, vec!["lib/logging"]);
    }
}
