//! archivist CLI: idempotent article archiving into a local knowledge base.
//!
//! Fetches articles into one self-contained directory per source, skips
//! regeneration when nothing changed, and processes inbox files in
//! resumable batches.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    let code = commands::run(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
