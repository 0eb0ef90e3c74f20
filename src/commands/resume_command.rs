//! The `resume` command: replay the pending subset of a stored session.

use std::sync::Arc;

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::Config;
use crate::core::checkpoint::CheckpointStore;
use crate::core::pipeline::Pipeline;
use crate::error::PixlyError;

/// Resume a session by id.
///
/// The session header supplies the target directory and mode; the run
/// replays the work pool with only the files still in a non-terminal state.
pub async fn execute(session_id: String, yes: bool) -> Result<()> {
    let checkpoint = Arc::new(CheckpointStore::open(&CheckpointStore::default_path())?);

    let Some(session) = checkpoint.session(&session_id)? else {
        let known = checkpoint.list_sessions()?;
        if known.is_empty() {
            return Err(PixlyError::Checkpoint(format!(
                "session {session_id} not found and the store is empty"
            )));
        }
        eprintln!("session {session_id} not found; stored sessions:");
        for session in known.iter().take(10) {
            eprintln!(
                "  {}  {}  {}/{} processed",
                session.id,
                session.target_dir.display(),
                session.processed,
                session.total
            );
        }
        return Err(PixlyError::Checkpoint(format!(
            "session {session_id} not found"
        )));
    };

    let config = Config {
        mode: session.mode,
        ..Config::default()
    };
    let run_cancel = CancellationToken::new();
    let pipeline = Pipeline::new(
        config,
        session.target_dir.clone(),
        checkpoint,
        run_cancel.clone(),
        !yes,
    )?;
    pipeline.check_required_tools()?;

    let signal_cancel = run_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; draining workers and flushing checkpoints");
            signal_cancel.cancel();
        }
    });

    let stats = pipeline.resume(&session_id).await?;
    super::convert_command::print_summary(&stats);
    Ok(())
}
