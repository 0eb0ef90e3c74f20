//! Progress watchdog and resource governor.
//!
//! The watchdog runs alongside the work pool and tracks three signals:
//! progress stagnation per active task, a hard per-file processing budget,
//! and process memory pressure. The governor condenses those signals into a
//! [`PressureLevel`] the strategy engine consults before admitting
//! high-effort operations and the pool consults when scaling.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use sysinfo::System;
use tokio_util::sync::CancellationToken;

use crate::config::WatchdogConfig;

/// Condensed resource pressure, consumed by the strategy engine and the
/// pool's scaling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    /// Memory below the warning threshold.
    Normal,
    /// Above 80% of the configured ceiling.
    Elevated,
    /// Above 90%; worker count is reduced.
    Critical,
}

/// Shared pressure state.
///
/// Stored as an atomic so readers on the decision path never take a lock.
#[derive(Debug, Default)]
pub struct ResourceGovernor {
    level: AtomicU8,
}

impl ResourceGovernor {
    /// Current pressure level.
    pub fn pressure(&self) -> PressureLevel {
        match self.level.load(Ordering::Relaxed) {
            2 => PressureLevel::Critical,
            1 => PressureLevel::Elevated,
            _ => PressureLevel::Normal,
        }
    }

    /// Update the pressure level.
    pub fn set_pressure(&self, level: PressureLevel) {
        let raw = match level {
            PressureLevel::Normal => 0,
            PressureLevel::Elevated => 1,
            PressureLevel::Critical => 2,
        };
        self.level.store(raw, Ordering::Relaxed);
    }
}

/// Progress record for one active task.
#[derive(Debug)]
struct ProgressEntry {
    path: PathBuf,
    size: u64,
    fraction: f64,
    started: Instant,
    last_advance: Instant,
    cancel: CancellationToken,
    escalation: u8,
    prompted: bool,
}

/// Handle a worker uses to report progress on its task.
#[derive(Clone)]
pub struct ProgressHandle {
    task_id: String,
    state: Arc<RwLock<HashMap<String, ProgressEntry>>>,
}

impl ProgressHandle {
    /// Report the current progress fraction for this task.
    pub fn report(&self, fraction: f64) {
        let mut state = self.state.write().unwrap();
        if let Some(entry) = state.get_mut(&self.task_id) {
            if fraction > entry.fraction {
                entry.fraction = fraction;
                entry.last_advance = Instant::now();
                entry.escalation = 0;
            }
        }
    }

    /// Remove this task from watchdog observation.
    pub fn complete(&self) {
        self.state.write().unwrap().remove(&self.task_id);
    }
}

/// The watchdog itself.
pub struct Watchdog {
    config: WatchdogConfig,
    memory_limit_bytes: u64,
    state: Arc<RwLock<HashMap<String, ProgressEntry>>>,
    governor: Arc<ResourceGovernor>,
    interactive: bool,
}

impl Watchdog {
    /// Create a watchdog with the given timing configuration and ceiling.
    pub fn new(config: WatchdogConfig, memory_limit_mb: u64, governor: Arc<ResourceGovernor>) -> Self {
        Self {
            config,
            memory_limit_bytes: memory_limit_mb * 1024 * 1024,
            state: Arc::new(RwLock::new(HashMap::new())),
            governor,
            interactive: false,
        }
    }

    /// Enable the force-exit prompt at extreme stagnation.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// The governor fed by this watchdog.
    pub fn governor(&self) -> Arc<ResourceGovernor> {
        Arc::clone(&self.governor)
    }

    /// Register a task for observation and get its progress handle.
    ///
    /// `cancel` is the task's own token; the watchdog cancels it when the
    /// per-file budget is exhausted.
    pub fn register(
        &self,
        task_id: &str,
        path: PathBuf,
        size: u64,
        cancel: CancellationToken,
    ) -> ProgressHandle {
        let now = Instant::now();
        self.state.write().unwrap().insert(
            task_id.to_string(),
            ProgressEntry {
                path,
                size,
                fraction: 0.0,
                started: now,
                last_advance: now,
                cancel,
                escalation: 0,
                prompted: false,
            },
        );
        ProgressHandle {
            task_id: task_id.to_string(),
            state: Arc::clone(&self.state),
        }
    }

    /// Number of tasks currently observed.
    pub fn observed(&self) -> usize {
        self.state.read().unwrap().len()
    }

    /// Run the observation loop until the run token is cancelled.
    pub async fn run(&self, run_cancel: CancellationToken) {
        let mut stagnation_tick = tokio::time::interval(Duration::from_secs(5));
        let mut memory_tick =
            tokio::time::interval(Duration::from_secs(self.config.memory_check_interval_secs));
        let mut system = System::new();

        loop {
            tokio::select! {
                _ = run_cancel.cancelled() => return,
                _ = stagnation_tick.tick() => {
                    let extreme = self.check_progress();
                    if !extreme.is_empty() && self.interactive {
                        self.offer_force_exit(&extreme, &run_cancel).await;
                    }
                }
                _ = memory_tick.tick() => self.check_memory(&mut system),
            }
        }
    }

    /// Ask once per task whether the whole run should be abandoned.
    async fn offer_force_exit(&self, stalled: &[String], run_cancel: &CancellationToken) {
        let prompt = format!(
            "{} task(s) are extremely stagnant ({}). Force-exit the run?",
            stalled.len(),
            stalled.join(", ")
        );
        let answer = tokio::time::timeout(
            Duration::from_secs(10),
            tokio::task::spawn_blocking(move || {
                dialoguer::Confirm::new()
                    .with_prompt(prompt)
                    .default(false)
                    .interact()
                    .unwrap_or(false)
            }),
        )
        .await;
        if let Ok(Ok(true)) = answer {
            warn!("watchdog: user requested force-exit");
            run_cancel.cancel();
        }
    }

    /// One stagnation sweep over the progress snapshot.
    ///
    /// Returns descriptions of tasks that just crossed the extreme tier and
    /// have not been prompted for yet.
    fn check_progress(&self) -> Vec<String> {
        let now = Instant::now();
        let mut extreme = Vec::new();
        let mut state = self.state.write().unwrap();
        for (task_id, entry) in state.iter_mut() {
            let budget = Duration::from_secs(self.config.per_file_timeout_secs);
            if now.duration_since(entry.started) > budget && !entry.cancel.is_cancelled() {
                error!(
                    "watchdog: {} exceeded the {}s per-file budget, cancelling",
                    entry.path.display(),
                    self.config.per_file_timeout_secs
                );
                entry.cancel.cancel();
                continue;
            }

            let stagnant_limit = if entry.size > self.config.large_file_threshold_bytes {
                Duration::from_secs(self.config.large_file_stagnant_timeout_secs)
            } else {
                Duration::from_secs(self.config.stagnant_timeout_secs)
            };
            let stalled_for = now.duration_since(entry.last_advance);
            let tier = (stalled_for.as_secs() / stagnant_limit.as_secs().max(1)) as u8;
            if tier > entry.escalation {
                entry.escalation = tier;
                match tier {
                    1 => info!(
                        "watchdog: {} ({} {:.0}%) has not advanced for {:?}",
                        task_id,
                        entry.path.display(),
                        entry.fraction * 100.0,
                        stalled_for
                    ),
                    2 => warn!(
                        "watchdog: {} stalled for {:?} (2x the stagnation limit)",
                        entry.path.display(),
                        stalled_for
                    ),
                    _ => {
                        error!(
                            "watchdog: {} extremely stagnant ({:?}); the encoder may be stuck",
                            entry.path.display(),
                            stalled_for
                        );
                        if !entry.prompted {
                            entry.prompted = true;
                            extreme.push(entry.path.display().to_string());
                        }
                    }
                }
            }
        }
        extreme
    }

    /// One memory sample against the configured ceiling.
    fn check_memory(&self, system: &mut System) {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return;
        };
        system.refresh_process(pid);
        let Some(process) = system.process(pid) else {
            return;
        };
        let used = process.memory();
        let ratio = used as f64 / self.memory_limit_bytes as f64;

        let level = if ratio > 0.9 {
            error!(
                "watchdog: memory {:.0} MiB is above 90% of the ceiling; reducing workers",
                used as f64 / (1024.0 * 1024.0)
            );
            PressureLevel::Critical
        } else if ratio > 0.8 {
            warn!(
                "watchdog: memory {:.0} MiB is above 80% of the ceiling",
                used as f64 / (1024.0 * 1024.0)
            );
            PressureLevel::Elevated
        } else {
            PressureLevel::Normal
        };
        self.governor.set_pressure(level);
    }
}
