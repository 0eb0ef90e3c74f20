//! Command-line interface for Pixly.
//!
//! The CLI is a thin shell: it parses flags into a [`crate::config::Config`]
//! and dispatches to the command implementations in [`crate::commands`].
//! Configuration files, localization, and shell completions are deliberate
//! non-features of the engine.

pub mod convert_args;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::Result;
pub use convert_args::ConvertArgs;

/// Batch media transcoding engine.
#[derive(Parser, Debug)]
#[command(
    name = "pixly",
    version = crate::VERSION,
    about = "Re-encode directory trees into JPEG XL, AVIF, or QuickTime with atomic replacement",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan, classify, and convert a directory tree.
    Convert(ConvertArgs),
    /// Scan and classify only; write an analysis report.
    Scan {
        /// Target directory to analyze.
        path: PathBuf,
        /// Mode to project operations for.
        #[arg(short, long, default_value = "quality")]
        mode: String,
    },
    /// Resume a previous session from the checkpoint store.
    Resume {
        /// Session id to resume.
        session_id: String,
        /// Never prompt; assume the safe default everywhere.
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Probe and print external tool availability.
    Tools,
    /// Maintain caches and the checkpoint store.
    Cache {
        /// Cache action.
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Actions for the `cache` subcommand.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Drop the tool-availability cache and prune finished sessions.
    Clear,
}

/// Parse the command line and dispatch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(args) => crate::commands::convert_command::execute(args).await,
        Commands::Scan { path, mode } => crate::commands::scan_command::execute(path, mode).await,
        Commands::Resume { session_id, yes } => {
            crate::commands::resume_command::execute(session_id, yes).await
        }
        Commands::Tools => crate::commands::tools_command::execute().await,
        Commands::Cache { action } => match action {
            CacheAction::Clear => crate::commands::cache_command::clear().await,
        },
    }
}
