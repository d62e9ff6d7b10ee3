//! Per-repository sync settings.
//!
//! Settings live in the database settings store as key/value pairs and are
//! merged over compiled defaults at load time, so a fresh database syncs
//! with sensible behavior and every knob is adjustable without a deploy.
//! Unknown keys are ignored for forward compatibility.

use tracing::warn;

use docsteward_shared::Result;
use docsteward_storage::Storage;

// ---------------------------------------------------------------------------
// Setting keys
// ---------------------------------------------------------------------------

/// Repository to sync from, either `owner/repo` or a browser URL.
pub const KEY_REPO: &str = "sync.repo";
/// Branch override; the repository default is used when unset.
pub const KEY_BRANCH: &str = "sync.branch";
/// Inclusion allow-list as a JSON array of path prefixes.
pub const KEY_INCLUDE: &str = "sync.include";
/// Model override for all sync LLM calls.
pub const KEY_MODEL: &str = "sync.model";
/// Cron expression gating scheduled syncs.
pub const KEY_SCHEDULE: &str = "sync.schedule";
/// Change-set size above which the planning stage runs.
pub const KEY_PLAN_THRESHOLD: &str = "plan.threshold";
/// Concurrent consolidation reviews.
pub const KEY_CONSOLIDATE_CONCURRENCY: &str = "consolidate.concurrency";

pub const KEY_PROMPT_SUMMARIZER: &str = "prompt.summarizer";
pub const KEY_PROMPT_PLANNER: &str = "prompt.planner";
pub const KEY_PROMPT_ANALYZER: &str = "prompt.analyzer";
pub const KEY_PROMPT_CONSOLIDATOR: &str = "prompt.consolidator";
pub const KEY_PROMPT_GENERATOR: &str = "prompt.generator";
pub const KEY_PROMPT_REVIEWER: &str = "prompt.reviewer";

const DEFAULT_PLAN_THRESHOLD: usize = 15;
const DEFAULT_CONSOLIDATE_CONCURRENCY: usize = 3;

// ---------------------------------------------------------------------------
// Default prompts
// ---------------------------------------------------------------------------

const DEFAULT_SUMMARIZER_PROMPT: &str = "\
You summarize source files for a documentation planner. For each file, \
write one sentence of at most 140 characters describing what the file \
implements. Plain text only, no markdown, no leading file name.";

const DEFAULT_PLANNER_PROMPT: &str = "\
You organize changed source files into documentation topic groups.
Rules:
- Propose directory patterns, not individual file paths.
- Every changed directory must fall under exactly one group or under shared_context.
- shared_context collects infrastructure and utility directories that inform other documents but should not get documents of their own.
- When an existing document already covers a directory, prefer a group that updates it over creating a near-duplicate.";

const DEFAULT_ANALYZER_PROMPT: &str = "\
You are a technical writer keeping product documentation in sync with source code.
Given changed files, the category list, and the index of existing documents, propose documents to create or update.
Prefer updating an existing document over creating a new one that would overlap it.
Write complete markdown bodies with a single top-level heading, not outlines.
List the source files and database tables each document draws on.";

const DEFAULT_CONSOLIDATOR_PROMPT: &str = "\
You review documentation drafts that landed in the same category and decide \
whether they describe one topic or several. Merge only when the drafts \
substantially overlap; otherwise keep them separate and tighten each title \
so the topics are clearly distinct. Never drop technical detail present in \
a draft.";

const DEFAULT_GENERATOR_PROMPT: &str = "\
You expand a short scope note into a full documentation page. Write \
complete markdown with a single top-level heading, concrete explanations, \
and references to the listed source files where they are relevant. Do not \
invent behavior the scope note does not support.";

const DEFAULT_REVIEWER_PROMPT: &str = "\
You review an automatically merged documentation page for semantic damage.
Compare the human-edited version, the AI proposal, and the merged result.
Flag contradictions, stale statements, and reasoning broken by the merge.
Reference the exact section heading each concern belongs to.
Return an empty list when the merged page reads correctly.";

// ---------------------------------------------------------------------------
// Settings structs
// ---------------------------------------------------------------------------

/// System prompts for each LLM stage, individually overridable.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub summarizer: String,
    pub planner: String,
    pub analyzer: String,
    pub consolidator: String,
    pub generator: String,
    pub reviewer: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            summarizer: DEFAULT_SUMMARIZER_PROMPT.to_string(),
            planner: DEFAULT_PLANNER_PROMPT.to_string(),
            analyzer: DEFAULT_ANALYZER_PROMPT.to_string(),
            consolidator: DEFAULT_CONSOLIDATOR_PROMPT.to_string(),
            generator: DEFAULT_GENERATOR_PROMPT.to_string(),
            reviewer: DEFAULT_REVIEWER_PROMPT.to_string(),
        }
    }
}

/// Effective sync configuration: stored settings merged over defaults.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub repo: Option<String>,
    pub branch: Option<String>,
    /// Allow-list of path prefixes. Nothing syncs while this is empty.
    pub include: Vec<String>,
    pub model: Option<String>,
    pub schedule: Option<String>,
    pub plan_threshold: usize,
    pub consolidate_concurrency: usize,
    pub prompts: Prompts,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            repo: None,
            branch: None,
            include: Vec::new(),
            model: None,
            schedule: None,
            plan_threshold: DEFAULT_PLAN_THRESHOLD,
            consolidate_concurrency: DEFAULT_CONSOLIDATE_CONCURRENCY,
            prompts: Prompts::default(),
        }
    }
}

impl SyncSettings {
    /// Load effective settings from the store.
    pub async fn load(storage: &Storage) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in storage.list_settings().await? {
            settings.apply(&key, &value);
        }
        Ok(settings)
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            KEY_REPO => self.repo = non_empty(value),
            KEY_BRANCH => self.branch = non_empty(value),
            KEY_INCLUDE => match serde_json::from_str::<Vec<String>>(value) {
                Ok(patterns) => self.include = patterns,
                Err(error) => {
                    warn!(key, %error, "ignoring malformed include patterns")
                }
            },
            KEY_MODEL => self.model = non_empty(value),
            KEY_SCHEDULE => self.schedule = non_empty(value),
            KEY_PLAN_THRESHOLD => match value.parse::<usize>() {
                Ok(threshold) => self.plan_threshold = threshold,
                Err(_) => warn!(key, value, "ignoring non-numeric setting"),
            },
            KEY_CONSOLIDATE_CONCURRENCY => match value.parse::<usize>() {
                Ok(concurrency) => self.consolidate_concurrency = concurrency.max(1),
                Err(_) => warn!(key, value, "ignoring non-numeric setting"),
            },
            KEY_PROMPT_SUMMARIZER => apply_prompt(&mut self.prompts.summarizer, value),
            KEY_PROMPT_PLANNER => apply_prompt(&mut self.prompts.planner, value),
            KEY_PROMPT_ANALYZER => apply_prompt(&mut self.prompts.analyzer, value),
            KEY_PROMPT_CONSOLIDATOR => apply_prompt(&mut self.prompts.consolidator, value),
            KEY_PROMPT_GENERATOR => apply_prompt(&mut self.prompts.generator, value),
            KEY_PROMPT_REVIEWER => apply_prompt(&mut self.prompts.reviewer, value),
            _ => {}
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

fn apply_prompt(slot: &mut String, value: &str) {
    // An empty override means "back to the default", which the caller
    // already put in the slot.
    if !value.trim().is_empty() {
        *slot = value.to_string();
    }
}
