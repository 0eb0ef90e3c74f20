//! The `scan` command: analysis without conversion.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::Config;
use crate::core::checkpoint::CheckpointStore;
use crate::core::pipeline::Pipeline;
use crate::core::strategy::Mode;

/// Scan and classify a tree, then print and persist the analysis summary.
pub async fn execute(path: PathBuf, mode: String) -> Result<()> {
    let config = Config {
        mode: mode.parse::<Mode>()?,
        ..Config::default()
    };
    let checkpoint = Arc::new(CheckpointStore::open(&CheckpointStore::default_path())?);
    let pipeline = Pipeline::new(config, path, checkpoint, CancellationToken::new(), false)?;

    let summary = pipeline.analyze().await?;

    println!("analysis of {}", summary.target_dir.display());
    println!("  visited:     {}", summary.visited);
    println!("  candidates:  {}", summary.candidates);
    println!("  pre-skipped: {}", summary.pre_skipped);
    println!("  deep probes: {}", summary.probe_queue);
    if !summary.projected_operations.is_empty() {
        println!("  projected operations:");
        for (operation, count) in &summary.projected_operations {
            println!("    {operation:<16} {count}");
        }
    }
    println!("  report written under ./reports/analysis/");
    Ok(())
}
