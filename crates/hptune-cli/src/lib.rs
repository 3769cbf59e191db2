//! hptune CLI Library
//!
//! Command-line interface for running a tuning trial and working with the
//! metrics file the tuning service reads:
//!
//! - **Train**: train the digit classifier and report a validation metric per epoch
//! - **Report**: append a single metric record by hand
//! - **Inspect**: print the records of a metrics file
//!
//! # Example
//!
//! ```bash
//! # One trial as launched by the tuning service
//! hptune train --lr 0.05 --momentum 0.9 --epochs 5
//!
//! # Report a value computed elsewhere
//! hptune report --tag accuracy --value 0.93 --step 12
//!
//! # Look at what has been written so far
//! hptune inspect --metric-file /tmp/hypertune/output.metrics --last 3
//! ```

pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};

pub use commands::{run_trial, InspectCommand, ReportCommand, TrainCommand};
pub use config::{ConfigError, RunConfig};

/// hptune - training trials for Vertex AI hyperparameter tuning
#[derive(Parser, Debug)]
#[command(name = "hptune")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the digit classifier and report the tuning metric every epoch
    Train(TrainCommand),

    /// Append one metric record to the metrics file
    Report(ReportCommand),

    /// Print the records of a metrics file
    Inspect(InspectCommand),
}

/// Result type alias for CLI operations
pub type CliResult<T> = anyhow::Result<T>;
