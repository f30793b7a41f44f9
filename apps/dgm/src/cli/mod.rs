//! # dgm CLI Module
//!
//! This module implements the CLI interface for the degraphmalizer.
//!
//! ## Available Commands
//!
//! - `check` - Validate the settings file and list the configured types
//! - `run` - Replay a fixture file through the engine and verify its output

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::CliError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// dgm - Degraphmalizer
///
/// Keeps denormalized documents in sync with the graph of references
/// between their sources.
#[derive(Parser, Debug)]
#[command(name = "dgm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (debug logging and per-recompute events)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the settings file
    #[arg(short, long, global = true, default_value = "dgm.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate settings and list the configured types
    Check,

    /// Replay a fixture file and verify the expected documents
    Run {
        /// Path to the fixture file (JSON)
        #[arg(short, long)]
        fixtures: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Some(Commands::Run { fixtures }) => {
            cmd_run(&cli.config, &fixtures, cli.json, cli.verbose).await
        }
        Some(Commands::Check) | None => cmd_check(&cli.config, cli.json),
    }
}
