//! Arguments for the `convert` subcommand.

use clap::Args;
use std::path::PathBuf;

use crate::Result;
use crate::config::{Config, CorruptedFileStrategy};
use crate::core::strategy::Mode;

/// Run the full conversion pipeline over a directory tree.
#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Target directory to scan and convert.
    pub path: PathBuf,

    /// Conversion mode: quality, auto+, or emoji.
    #[arg(short, long, default_value = "quality")]
    pub mode: String,

    /// Mirror outputs into this root instead of replacing in place.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Keep the original file after an in-place conversion.
    #[arg(long)]
    pub keep_original: bool,

    /// Initial conversion worker count (default: CPU count).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Memory ceiling in MiB for the resource governor.
    #[arg(long, value_name = "MB")]
    pub memory_limit_mb: Option<u64>,

    /// Corrupted-file strategy: delete, move_to_trash, ignore, or prompt.
    #[arg(long, value_name = "STRATEGY")]
    pub corrupted: Option<String>,

    /// Never prompt; assume the safe default everywhere.
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl ConvertArgs {
    /// Build the engine configuration from the flags.
    pub fn to_config(&self) -> Result<Config> {
        let mut config = Config {
            mode: self.mode.parse::<Mode>()?,
            ..Config::default()
        };
        config.output.directory_template = self.output_dir.clone();
        config.output.keep_original = self.keep_original;
        if let Some(workers) = self.workers {
            config.concurrency.conversion_workers = workers;
        }
        if let Some(limit) = self.memory_limit_mb {
            config.concurrency.memory_limit_mb = limit;
        }
        if let Some(strategy) = &self.corrupted {
            config.problem_files.corrupted_file_strategy =
                strategy.parse::<CorruptedFileStrategy>()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Whether prompts are allowed for this invocation.
    pub fn interactive(&self) -> bool {
        !self.yes
    }
}
