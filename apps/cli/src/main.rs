//! docsteward CLI — keep a documentation corpus in sync with its source
//! repository.
//!
//! Syncs changed source files through analysis, drafting, and a
//! human-edit-preserving merge into the document store.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
