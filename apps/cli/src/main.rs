//! bulletin: a scheduled council newsletter.
//!
//! Searches the news for each configured category, enriches the results with
//! AI summaries and relevance scores, renders an HTML digest and emails it.

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
