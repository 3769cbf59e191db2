//! hptune CLI - run tuning trials and manage their metrics files.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hptune_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("hptune=info".parse()?))
        .init();

    let cli = Cli::parse();

    info!("hptune starting...");

    match cli.command {
        Commands::Train(cmd) => cmd.run()?,
        Commands::Report(cmd) => cmd.run()?,
        Commands::Inspect(cmd) => cmd.run()?,
    }

    info!("hptune completed successfully");
    Ok(())
}
