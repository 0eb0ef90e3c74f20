//! The run-scoped pipeline binding scan, classify, strategy, pool, replace,
//! checkpoint, and report together.
//!
//! There is no global run state: everything a component needs is built here
//! and passed in at construction. Process-wide state is limited to the
//! tool-availability cache and the checkpoint-store path. A single
//! hierarchical cancellation token covers the run; per-task tokens are its
//! children.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::{Config, CorruptedFileStrategy};
use crate::core::arena::BufferPool;
use crate::core::checkpoint::{CheckpointStore, SessionInfo, TransitionDetail};
use crate::core::classifier::Classifier;
use crate::core::executor::ConversionExecutor;
use crate::core::media::{ConversionResult, MediaFile};
use crate::core::pool::{PoolConfig, PoolEvent, PoolHandle, Task, TaskPriority, TaskState};
use crate::core::probe::Prober;
use crate::core::replace::{self, Replacer};
use crate::core::report::{AnalysisSummary, Reporter, RunStats};
use crate::core::scanner::Scanner;
use crate::core::strategy::{self, Operation, StrategyParams};
use crate::core::watchdog::{ResourceGovernor, Watchdog};
use crate::error::PixlyError;
use crate::services::encoders::Encoders;
use crate::services::invoker::{ToolInvoker, ToolKind, availability};

/// How long the corrupted-file prompt waits before defaulting to ignore.
const CORRUPTED_PROMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything one run needs, wired once.
pub struct Pipeline {
    config: Config,
    target_dir: PathBuf,
    checkpoint: Arc<CheckpointStore>,
    governor: Arc<ResourceGovernor>,
    watchdog: Arc<Watchdog>,
    invoker: Arc<ToolInvoker>,
    prober: Arc<Prober>,
    encoders: Arc<Encoders>,
    replacer: Arc<Replacer>,
    buffers: Arc<BufferPool>,
    reporter: Reporter,
    run_cancel: CancellationToken,
    interactive: bool,
}

impl Pipeline {
    /// Validate the configuration and wire the components for a run over
    /// `target_dir`.
    pub fn new(
        config: Config,
        target_dir: PathBuf,
        checkpoint: Arc<CheckpointStore>,
        run_cancel: CancellationToken,
        interactive: bool,
    ) -> Result<Self> {
        config.validate()?;
        let target_dir = target_dir
            .canonicalize()
            .map_err(|_| PixlyError::PathNotFound(target_dir.clone()))?;

        let governor = Arc::new(ResourceGovernor::default());
        let watchdog = Arc::new(
            Watchdog::new(
                config.watchdog.clone(),
                config.concurrency.memory_limit_mb,
                Arc::clone(&governor),
            )
            .interactive(interactive),
        );
        // The mirror template root must be reachable for encoder output
        // paths; fold it into the allowed set.
        let mut security = config.security.clone();
        if let Some(template) = &config.output.directory_template {
            security.allowed_directories.push(template.clone());
        }
        let invoker = Arc::new(ToolInvoker::new(&security, &target_dir));
        let prober = Arc::new(Prober::new(Arc::clone(&invoker), &config.tools));
        let encoders = Arc::new(Encoders::new(Arc::clone(&invoker), &config.tools));
        let replacer = Arc::new(Replacer::new(
            Arc::clone(&invoker),
            &config.tools,
            config.output.keep_original,
        ));

        Ok(Self {
            config,
            target_dir,
            checkpoint,
            governor,
            watchdog,
            invoker,
            prober,
            encoders,
            replacer,
            buffers: Arc::new(BufferPool::default()),
            reporter: Reporter::default(),
            run_cancel,
            interactive,
        })
    }

    /// Reporter override for tests.
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// The run-wide cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.run_cancel.clone()
    }

    /// Verify every tool the selected mode needs is runnable.
    ///
    /// A missing required tool is a fatal setup error. The metadata tool is
    /// always optional (timestamps are the fallback).
    pub fn check_required_tools(&self) -> Result<()> {
        let mut required = vec![ToolKind::Ffprobe, ToolKind::Ffmpeg, ToolKind::Avifenc];
        if matches!(
            self.config.mode,
            strategy::Mode::Quality | strategy::Mode::AutoPlus
        ) {
            required.push(ToolKind::Cjxl);
        }
        for kind in required {
            let path = kind.resolve(&self.config.tools);
            let status = availability::check_tool(&path);
            if !status.available {
                return Err(PixlyError::ToolNotAvailable(
                    path.to_string_lossy().into_owned(),
                ));
            }
        }
        Ok(())
    }

    /// Execute a full conversion run and return its statistics.
    pub async fn run(&self) -> Result<RunStats> {
        let session = SessionInfo::new(self.target_dir.clone(), self.config.mode);
        self.checkpoint.create_session(&session)?;
        info!(
            "starting session {} in {} mode over {}",
            session.id,
            self.config.mode,
            self.target_dir.display()
        );
        self.run_session(session, None).await
    }

    /// Resume a previous session: rescan and replay the pending subset.
    pub async fn resume(&self, session_id: &str) -> Result<RunStats> {
        let session = self.checkpoint.session(session_id)?.ok_or_else(|| {
            PixlyError::Checkpoint(format!("session {session_id} not found"))
        })?;
        let pending: HashSet<PathBuf> = self
            .checkpoint
            .pending_files(session_id)?
            .into_iter()
            .map(|record| record.path)
            .collect();
        info!(
            "resuming session {} with {} pending files",
            session_id,
            pending.len()
        );
        self.run_session(session, Some(pending)).await
    }

    /// Scan and classify without converting; returns the analysis summary.
    pub async fn analyze(&self) -> Result<AnalysisSummary> {
        let outcome = self.scan().await?;
        let params = StrategyParams::from(&self.config.tuning);

        let mut extensions = std::collections::BTreeMap::new();
        let mut projected = std::collections::BTreeMap::new();
        let mut probe_queue = 0u64;
        for scanned in &outcome.candidates {
            *extensions
                .entry(scanned.file.extension.clone())
                .or_insert(0u64) += 1;
            if scanned.needs_probe {
                probe_queue += 1;
            }
            let operation = strategy::decide(
                self.config.mode,
                &scanned.file,
                &scanned.info,
                &params,
                self.governor.pressure(),
            );
            *projected
                .entry(operation.method_tag().to_string())
                .or_insert(0u64) += 1;
        }

        let summary = AnalysisSummary {
            target_dir: self.target_dir.clone(),
            mode: self.config.mode,
            visited: outcome.visited,
            candidates: outcome.candidates.len() as u64,
            pre_skipped: outcome.skipped.len() as u64,
            probe_queue,
            extensions,
            projected_operations: projected,
        };
        self.reporter.write_analysis_report(&summary)?;
        Ok(summary)
    }

    async fn run_session(
        &self,
        session: SessionInfo,
        pending_filter: Option<HashSet<PathBuf>>,
    ) -> Result<RunStats> {
        let mut stats = RunStats::new(
            session.id.clone(),
            self.config.mode,
            self.target_dir.clone(),
        );

        let watchdog = Arc::clone(&self.watchdog);
        let watchdog_cancel = self.run_cancel.clone();
        let watchdog_task = tokio::spawn(async move { watchdog.run(watchdog_cancel).await });

        // Phase 1: scan.
        let mut outcome = self.scan().await?;
        if let Some(pending) = &pending_filter {
            outcome.candidates.retain(|s| pending.contains(&s.file.path));
            outcome.skipped.retain(|r| pending.contains(&r.input_path));
        }
        for result in std::mem::take(&mut outcome.skipped) {
            self.record_terminal(&session.id, TaskState::Skipped, &result, &mut stats)?;
        }

        // Phase 2: classify with targeted deep probes.
        let classifier = Classifier::new(Arc::clone(&self.prober), self.invoker.capacity());
        let classified = classifier
            .classify(outcome.candidates, &self.run_cancel)
            .await;
        info!(
            "classified: {} ready, {} corrupted, {} probed",
            classified.ready.len(),
            classified.corrupted.len(),
            classified.probed
        );

        // Phase 3: corrupted-file policy, before the pool starts.
        for result in self.apply_corrupted_policy(classified.corrupted).await {
            let state = if result.success {
                TaskState::Skipped
            } else {
                TaskState::Failed
            };
            self.record_terminal(&session.id, state, &result, &mut stats)?;
        }

        // Phase 4: strategy decisions and submission.
        let params = StrategyParams::from(&self.config.tuning);
        let executor = Arc::new(ConversionExecutor::new(
            Arc::clone(&self.encoders),
            Arc::clone(&self.replacer),
            Arc::clone(&self.watchdog),
            self.target_dir.clone(),
            &self.config,
        ));
        let pool_config = PoolConfig::from_concurrency(&self.config.concurrency);
        let handle = PoolHandle::build(
            pool_config,
            executor,
            Arc::clone(&self.governor),
            self.run_cancel.clone(),
        );

        let mut admitted: u64 = 0;
        for scanned in classified.ready {
            let operation = strategy::decide(
                self.config.mode,
                &scanned.file,
                &scanned.info,
                &params,
                self.governor.pressure(),
            );
            let priority = priority_for(&operation);
            let path = scanned.file.path.clone();
            let size = scanned.file.size;
            let task = Task::new(scanned.file, scanned.info, operation, priority);

            let submitted = handle
                .scheduler
                .submit_with_priority(task, priority)
                .await;
            if submitted.is_accepted() {
                admitted += 1;
                self.checkpoint.record_transition(
                    &session.id,
                    &path,
                    TaskState::Queued,
                    &TransitionDetail {
                        size,
                        ..TransitionDetail::default()
                    },
                )?;
            } else {
                let result =
                    ConversionResult::failed(&path, size, "submit", "worker pool rejected task");
                self.record_terminal(&session.id, TaskState::Failed, &result, &mut stats)?;
            }
        }
        self.checkpoint
            .set_session_total(&session.id, stats.total_files + admitted)?;

        // Phase 5: drain lifecycle events until every admitted task ends.
        let mut events = handle.events.lock().await;
        let mut finished: u64 = 0;
        while finished < admitted {
            let Some(event) = events.recv().await else {
                break;
            };
            match event {
                PoolEvent::Started { path, .. } => {
                    self.checkpoint.record_transition(
                        &session.id,
                        &path,
                        TaskState::Running,
                        &TransitionDetail::default(),
                    )?;
                }
                PoolEvent::Finished { state, result, .. } => {
                    finished += 1;
                    self.record_terminal(&session.id, state, &result, &mut stats)?;
                }
            }
        }
        drop(events);

        handle.pool.drain().await;
        self.run_cancel.cancel();
        let _ = watchdog_task.await;

        stats.finish();
        self.reporter.write_conversion_reports(&stats)?;
        let (gets, puts) = self.buffers.counters();
        if gets > 0 {
            info!("buffer pool: {gets} gets, {puts} puts");
        }
        info!(
            "session {} finished: {} completed, {} skipped, {} failed",
            session.id, stats.completed, stats.skipped, stats.failed
        );
        Ok(stats)
    }

    async fn scan(&self) -> Result<crate::core::scanner::ScanOutcome> {
        let scanner = Scanner::new(
            self.target_dir.clone(),
            self.config.mode,
            self.config.tuning.suspicion_probe_threshold,
        )
        .with_buffers(Arc::clone(&self.buffers));
        tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| PixlyError::concurrency(format!("scan task panicked: {e}")))?
    }

    /// Apply the configured corrupted-file policy.
    ///
    /// Successful results here are policy skips; failures mean the policy
    /// itself could not be applied.
    async fn apply_corrupted_policy(&self, corrupted: Vec<MediaFile>) -> Vec<ConversionResult> {
        if corrupted.is_empty() {
            return Vec::new();
        }
        let strategy = self.effective_corrupted_strategy(corrupted.len()).await;
        info!(
            "corrupted-file policy {:?} applied to {} files",
            strategy,
            corrupted.len()
        );

        corrupted
            .into_iter()
            .map(|file| match strategy {
                CorruptedFileStrategy::Ignore | CorruptedFileStrategy::Prompt => {
                    ConversionResult::skipped(&file.path, file.size, "corrupted: ignored")
                }
                CorruptedFileStrategy::Delete => match std::fs::remove_file(&file.path) {
                    Ok(()) => {
                        ConversionResult::skipped(&file.path, file.size, "corrupted: deleted")
                    }
                    Err(err) => ConversionResult::failed(
                        &file.path,
                        file.size,
                        "corrupted-delete",
                        err.to_string(),
                    ),
                },
                CorruptedFileStrategy::MoveToTrash => match replace::move_to_trash(&file.path) {
                    Ok(_) => ConversionResult::skipped(
                        &file.path,
                        file.size,
                        "corrupted: moved to trash",
                    ),
                    Err(err) => ConversionResult::failed(
                        &file.path,
                        file.size,
                        "corrupted-trash",
                        err.to_string(),
                    ),
                },
            })
            .collect()
    }

    /// Resolve `Prompt` to a concrete strategy, with a 5 s timeout that
    /// defaults to ignore.
    async fn effective_corrupted_strategy(&self, count: usize) -> CorruptedFileStrategy {
        let configured = self.config.problem_files.corrupted_file_strategy;
        if configured != CorruptedFileStrategy::Prompt {
            return configured;
        }
        if !self.interactive {
            return CorruptedFileStrategy::Ignore;
        }
        let prompt = format!("{count} corrupted file(s) found. Move them to .trash?");
        let answer = tokio::time::timeout(
            CORRUPTED_PROMPT_TIMEOUT,
            tokio::task::spawn_blocking(move || {
                dialoguer::Confirm::new()
                    .with_prompt(prompt)
                    .default(false)
                    .interact()
                    .unwrap_or(false)
            }),
        )
        .await;
        match answer {
            Ok(Ok(true)) => CorruptedFileStrategy::MoveToTrash,
            _ => {
                warn!("corrupted-file prompt timed out or declined; ignoring files");
                CorruptedFileStrategy::Ignore
            }
        }
    }

    fn record_terminal(
        &self,
        session_id: &str,
        state: TaskState,
        result: &ConversionResult,
        stats: &mut RunStats,
    ) -> Result<()> {
        self.checkpoint.record_transition(
            session_id,
            &result.input_path,
            state,
            &TransitionDetail {
                error: result.error.clone(),
                output_path: (!result.skipped).then(|| result.output_path.clone()),
                size: result.original_size,
            },
        )?;
        stats.record(result);
        Ok(())
    }
}

/// Map operation kind to a dispatch lane: cheap operations clear first,
/// multi-probe work yields.
fn priority_for(operation: &Operation) -> TaskPriority {
    match operation {
        Operation::Skip { .. } => TaskPriority::High,
        Operation::RepackageVideo | Operation::Repackage(_) => TaskPriority::High,
        Operation::LosslessReencode(_) => TaskPriority::Normal,
        Operation::LossyProbe(_) => TaskPriority::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategy::{LosslessPlan, RepackagePlan, TargetFormat};

    #[test]
    fn test_priority_mapping() {
        assert_eq!(
            priority_for(&Operation::skip("x")),
            TaskPriority::High
        );
        assert_eq!(priority_for(&Operation::RepackageVideo), TaskPriority::High);
        assert_eq!(
            priority_for(&Operation::Repackage(RepackagePlan {
                jpeg_recompression: true,
                floors: None
            })),
            TaskPriority::High
        );
        assert_eq!(
            priority_for(&Operation::LosslessReencode(LosslessPlan {
                target: TargetFormat::Jxl,
                pre: None,
                effort: crate::core::strategy::Effort::High
            })),
            TaskPriority::Normal
        );
    }

    #[tokio::test]
    async fn test_pipeline_rejects_missing_target() {
        let config = Config::default();
        let tmp = tempfile::tempdir().unwrap();
        let checkpoint =
            Arc::new(CheckpointStore::open(&tmp.path().join("c.db")).unwrap());
        let result = Pipeline::new(
            config,
            PathBuf::from("/definitely/not/a/real/dir"),
            checkpoint,
            CancellationToken::new(),
            false,
        );
        assert!(matches!(result, Err(PixlyError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_non_interactive_prompt_defaults_to_ignore() {
        let mut config = Config::default();
        config.problem_files.corrupted_file_strategy = CorruptedFileStrategy::Prompt;
        let tmp = tempfile::tempdir().unwrap();
        let checkpoint =
            Arc::new(CheckpointStore::open(&tmp.path().join("c.db")).unwrap());
        let pipeline = Pipeline::new(
            config,
            tmp.path().to_path_buf(),
            checkpoint,
            CancellationToken::new(),
            false,
        )
        .unwrap();
        assert_eq!(
            pipeline.effective_corrupted_strategy(3).await,
            CorruptedFileStrategy::Ignore
        );
    }
}
