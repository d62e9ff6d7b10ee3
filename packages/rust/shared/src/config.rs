//! Application configuration for docsteward.
//!
//! User config lives at `~/.docsteward/docsteward.toml`. It holds the
//! bootstrap values the engine needs before it can reach the database:
//! the database path, provider base URLs, and the *names* of the env vars
//! holding credentials. Per-repository sync settings (inclusion patterns,
//! prompts, schedule) live in the database settings store instead.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocstewardError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docsteward.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docsteward";

// ---------------------------------------------------------------------------
// Config structs (matching docsteward.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Source repository provider settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.docsteward/docsteward.db".into()
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the repository provider API.
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Name of the env var holding the access token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Files larger than this are skipped rather than fetched.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Concurrent content fetches.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            token_env: default_token_env(),
            max_file_bytes: default_max_file_bytes(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

fn default_source_base_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_max_file_bytes() -> u64 {
    262_144
}
fn default_fetch_concurrency() -> u32 {
    5
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible completions API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model, overridable in the settings store.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docsteward/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocstewardError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docsteward/docsteward.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocstewardError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocstewardError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocstewardError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocstewardError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocstewardError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database path, expanding a leading `~`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    expand_home(&config.database.path)
}

fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| DocstewardError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Read the LLM API key from the configured env var.
pub fn llm_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DocstewardError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Read the source provider token from the configured env var.
pub fn source_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.source.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DocstewardError::config(format!(
            "source access token not found. Set the {var_name} environment variable."
        ))),
    }
}
