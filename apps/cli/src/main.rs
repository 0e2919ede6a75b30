//! sitekb CLI: turn a website into a queryable knowledge base.
//!
//! Crawls a site, chunks and embeds its content, and serves similarity
//! queries over the result.

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
