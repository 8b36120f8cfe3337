//! Pagecast CLI: turn web pages into stored PDF artifacts and AI learning paths.
//!
//! Runs the HTTP service or a single pipeline request from the terminal.

mod commands;
mod wiring;

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
