//! gfunpack CLI - Command-line interface for bundle image extraction

pub mod commands;
pub mod progress;

use clap::Parser;
use commands::Commands;

#[derive(Parser)]
#[command(name = "gfunpack")]
#[command(version, about = "gfunpack: incremental sprite extraction from asset bundles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Run the gfunpack CLI
pub fn run_cli() -> anyhow::Result<()> {
    // Setup logging (RUST_LOG controls the filter)
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    cli.command.execute()?;

    Ok(())
}
