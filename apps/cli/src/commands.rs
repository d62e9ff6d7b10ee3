//! CLI command definitions, routing, and tracing setup.

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docsteward_core::notify::TracingNotifier;
use docsteward_core::pipeline::{self, ProgressSink, SyncReport};
use docsteward_core::settings;
use docsteward_shared::{
    AppConfig, RunStatus, TriggerType, database_path, init_config, load_config,
};
use docsteward_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docsteward — documentation that follows the code.
#[derive(Parser)]
#[command(
    name = "docsteward",
    version,
    about = "Keep a documentation corpus in sync with its source repository.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Initialize the config file with defaults.
    Init,

    /// Run a sync against the configured repository.
    Sync {
        /// Only run when the configured cron schedule says one is due.
        #[arg(long)]
        if_due: bool,

        /// Plain line-by-line progress instead of a spinner.
        #[arg(long)]
        plain: bool,
    },

    /// Show recent sync runs.
    Runs {
        /// Number of runs to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// List documents in the corpus.
    Docs,

    /// Store a sync setting (e.g. sync.repo, sync.include, sync.schedule).
    Set {
        /// Setting key.
        key: String,
        /// Setting value. Include patterns are a JSON array of paths.
        value: String,
    },

    /// Read one sync setting, or all of them.
    Get {
        /// Setting key. Omit to list every stored setting.
        key: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init => cmd_init().await,
        Command::Sync { if_due, plain } => cmd_sync(if_due, plain).await,
        Command::Runs { limit } => cmd_runs(limit).await,
        Command::Docs => cmd_docs().await,
        Command::Set { key, value } => cmd_set(&key, &value).await,
        Command::Get { key } => cmd_get(key.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open(&database_path(config)?).await?)
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open_readonly(&database_path(config)?).await?)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress lines for the terminal: an indicatif spinner, or plain
/// println when asked (useful under pipes and json logs).
struct CliProgress {
    spinner: Option<ProgressBar>,
}

impl CliProgress {
    fn new(plain: bool) -> Self {
        if plain {
            return Self { spinner: None };
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner: Some(spinner) }
    }

    fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

impl ProgressSink for CliProgress {
    fn phase(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(message.to_string()),
            None => println!("{message}"),
        }
    }

    fn item(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(format!("  {message}")),
            None => println!("  {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_sync(if_due: bool, plain: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let notifier = TracingNotifier;
    let progress = CliProgress::new(plain);

    info!(if_due, "starting sync");

    let report = if if_due {
        match pipeline::run_sync_if_due(&config, &storage, &notifier, &progress).await {
            Ok(Some(report)) => report,
            Ok(None) => {
                progress.finish();
                println!("No sync due.");
                return Ok(());
            }
            Err(err) => {
                progress.finish();
                return Err(err.into());
            }
        }
    } else {
        match pipeline::run_sync(&config, &storage, &notifier, TriggerType::Manual, &progress).await
        {
            Ok(report) => report,
            Err(err) => {
                progress.finish();
                return Err(err.into());
            }
        }
    };
    progress.finish();

    let SyncReport::Finished { run_id, status, stats } = report else {
        println!("A sync is already running; skipped.");
        return Ok(());
    };

    if status != RunStatus::Completed {
        let message = storage
            .get_run(&run_id)
            .await?
            .and_then(|run| run.error_message)
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(eyre!("sync failed: {message} (run {run_id})"));
    }

    println!();
    println!("  Sync completed.");
    println!("  Run:        {run_id}");
    println!(
        "  Files:      +{} ~{} -{}",
        stats.files_added, stats.files_modified, stats.files_removed
    );
    println!(
        "  Documents:  {} created, {} updated, {} conflicted",
        stats.documents_created, stats.documents_updated, stats.documents_conflicted
    );
    println!(
        "  Tokens:     {} prompt / {} completion",
        stats.usage.prompt_tokens, stats.usage.completion_tokens
    );
    if !stats.errors.is_empty() {
        println!("  Warnings:   {}", stats.errors.len());
        for error in &stats.errors {
            println!("    - {error}");
        }
    }
    println!();

    Ok(())
}

async fn cmd_runs(limit: u32) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    let runs = storage.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }

    for run in runs {
        let id = run.id.get(..8).unwrap_or(&run.id);
        println!(
            "  {id}  {:<9}  {:<9}  started {}  files +{} ~{} -{}  docs +{} ~{} !{}",
            run.status.to_string(),
            run.trigger.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.files_added,
            run.files_modified,
            run.files_removed,
            run.documents_created,
            run.documents_updated,
            run.documents_conflicted,
        );
        if let Some(message) = &run.error_message {
            println!("            error: {message}");
        }
        if !run.error_log.is_empty() {
            println!("            {} degraded item(s)", run.error_log.len());
        }
    }

    Ok(())
}

async fn cmd_docs() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;

    let docs = storage.list_documents().await?;
    if docs.is_empty() {
        println!("No documents yet. Run `docsteward sync` after configuring a repository.");
        return Ok(());
    }

    let categories: HashMap<String, String> = storage
        .list_categories()
        .await?
        .into_iter()
        .map(|category| (category.id, category.name))
        .collect();

    for doc in docs {
        let category = doc
            .category_id
            .as_ref()
            .and_then(|id| categories.get(id))
            .map(String::as_str)
            .unwrap_or("-");
        let mut flags = Vec::new();
        if doc.has_human_edits {
            flags.push("human-edited");
        }
        if doc.needs_review {
            flags.push("needs-review");
        }
        println!(
            "  {:<32}  {:<16}  updated {}  {}",
            doc.slug,
            category,
            doc.updated_at.format("%Y-%m-%d %H:%M:%S"),
            flags.join(", "),
        );
    }

    Ok(())
}

async fn cmd_set(key: &str, value: &str) -> Result<()> {
    if key == settings::KEY_INCLUDE {
        serde_json::from_str::<Vec<String>>(value)
            .map_err(|e| eyre!("{key} must be a JSON array of paths, e.g. [\"src\"]: {e}"))?;
    }

    let config = load_config()?;
    let storage = open_storage(&config).await?;
    storage.set_setting(key, value).await?;
    println!("  {key} = {value}");
    Ok(())
}

async fn cmd_get(key: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;

    match key {
        Some(key) => match storage.get_setting(key).await? {
            Some(value) => println!("{value}"),
            None => println!("(not set)"),
        },
        None => {
            let entries = storage.list_settings().await?;
            if entries.is_empty() {
                println!("No settings stored.");
                return Ok(());
            }
            for (key, value) in entries {
                println!("  {key} = {value}");
            }
        }
    }

    Ok(())
}
