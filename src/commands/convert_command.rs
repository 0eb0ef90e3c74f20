//! The `convert` command: the full pipeline over one directory tree.

use std::sync::Arc;

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::cli::ConvertArgs;
use crate::core::checkpoint::CheckpointStore;
use crate::core::pipeline::Pipeline;

/// Execute a conversion run.
///
/// Ctrl-C cancels the run token: in-flight encodes finish, queued tasks
/// drain, the checkpoint store flushes, and the report still gets written.
pub async fn execute(args: ConvertArgs) -> Result<()> {
    let config = args.to_config()?;
    let checkpoint = Arc::new(CheckpointStore::open(&CheckpointStore::default_path())?);
    let run_cancel = CancellationToken::new();

    let pipeline = Pipeline::new(
        config,
        args.path.clone(),
        checkpoint,
        run_cancel.clone(),
        args.interactive(),
    )?;
    pipeline.check_required_tools()?;

    let signal_cancel = run_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; draining workers and flushing checkpoints");
            signal_cancel.cancel();
        }
    });

    let stats = pipeline.run().await?;
    print_summary(&stats);
    Ok(())
}

/// Final console summary; the detailed reports live under `./reports/`.
pub(crate) fn print_summary(stats: &crate::core::report::RunStats) {
    println!();
    println!("session {}", stats.session_id);
    println!(
        "  {} files: {} completed, {} skipped, {} failed",
        stats.total_files, stats.completed, stats.skipped, stats.failed
    );
    if stats.completed > 0 {
        println!(
            "  saved {} bytes ({:.1}% overall reduction)",
            stats.bytes_saved(),
            stats.overall_reduction() * 100.0
        );
    }
    if stats.failed > 0 {
        println!("  see the detailed report under ./reports/conversion/");
    }
}
