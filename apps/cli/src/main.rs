//! provdir CLI: healthcare provider directory pipeline.
//!
//! Validates provider contact and credential data against external sources,
//! enriches it from credential documents, scores its quality, and exports a
//! review-ready directory.

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
