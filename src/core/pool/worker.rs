//! Worker pool: eager, bounded, dynamically sized.
//!
//! The pool owns tasks by id once submitted. A single state lock guards the
//! worker set and the current size; counters are atomics readable without
//! the lock. The spillover queue accepts direct submissions when the
//! priority lanes are saturated, so producers never block indefinitely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::PoolConfig;
use super::task::{PoolEvent, Task, TaskExecutor, TaskState};

/// Atomically updated pool counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    total: AtomicU64,
    wait_ms_sum: AtomicU64,
    exec_ms_sum: AtomicU64,
    finished: AtomicU64,
}

/// Read-only view of the pool counters.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Workers currently executing a task.
    pub active_workers: usize,
    /// Tasks waiting in lanes or the spillover queue.
    pub queued: usize,
    /// Tasks that reached `Completed` or `Skipped`.
    pub completed: u64,
    /// Tasks that reached `Failed` or `Canceled`.
    pub failed: u64,
    /// Every task ever submitted.
    pub total: u64,
    /// Mean queue wait.
    pub average_wait: Duration,
    /// Mean execution time.
    pub average_execution: Duration,
}

impl PoolMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        let finished = self.finished.load(Ordering::Relaxed).max(1);
        MetricsSnapshot {
            active_workers: self.active.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            average_wait: Duration::from_millis(
                self.wait_ms_sum.load(Ordering::Relaxed) / finished,
            ),
            average_execution: Duration::from_millis(
                self.exec_ms_sum.load(Ordering::Relaxed) / finished,
            ),
        }
    }

    /// Tasks sitting in queues, exposed for the scheduler's utilization
    /// measurement.
    pub fn queued_now(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Adjust the queued gauge.
    pub(super) fn add_queued(&self, delta: isize) {
        if delta >= 0 {
            self.queued.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            self.queued.fetch_sub((-delta) as usize, Ordering::Relaxed);
        }
    }
}

struct WorkerInfo {
    task_id: String,
    started: Instant,
}

struct PoolState {
    workers: HashMap<Uuid, WorkerInfo>,
    size: usize,
}

/// The bounded worker pool.
pub struct WorkerPool {
    executor: Arc<dyn TaskExecutor>,
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
    metrics: Arc<PoolMetrics>,
    events: mpsc::UnboundedSender<PoolEvent>,
    spillover_tx: mpsc::Sender<Task>,
    run_cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool and start its spillover dispatcher.
    ///
    /// `events` receives a [`PoolEvent`] on every lifecycle transition.
    pub fn new(
        config: PoolConfig,
        executor: Arc<dyn TaskExecutor>,
        events: mpsc::UnboundedSender<PoolEvent>,
        run_cancel: CancellationToken,
    ) -> Arc<Self> {
        let (spillover_tx, spillover_rx) =
            mpsc::channel::<Task>(config.backpressure_queue_capacity);
        let pool = Arc::new(Self {
            executor,
            state: Arc::new(Mutex::new(PoolState {
                workers: HashMap::new(),
                size: config.initial_size.max(1),
            })),
            metrics: Arc::new(PoolMetrics::default()),
            events,
            spillover_tx,
            run_cancel,
            config,
        });
        pool.clone().start_spillover_dispatcher(spillover_rx);
        pool
    }

    /// Pool counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared handle to the raw counters (for the scheduler).
    pub fn metrics_handle(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Current worker budget.
    pub fn current_size(&self) -> usize {
        self.state.lock().unwrap().size
    }

    /// Workers currently executing.
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().workers.len()
    }

    /// Whether a dispatch would currently find a free worker slot.
    ///
    /// Advisory only: a slot can be taken between this check and the
    /// dispatch, in which case `try_execute` still rejects.
    pub fn has_capacity(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.workers.len() < state.size
    }

    /// Resize the worker budget, clamped to the configured bounds.
    ///
    /// Shrinking never interrupts running workers; the budget applies to
    /// new dispatches only.
    pub fn scale_to(&self, size: usize) {
        let clamped = size.clamp(self.config.min_size, self.config.max_size);
        let mut state = self.state.lock().unwrap();
        if state.size != clamped {
            debug!("pool: resizing {} -> {}", state.size, clamped);
            state.size = clamped;
        }
    }

    /// Try to dispatch a task onto a free worker slot.
    ///
    /// Returns the task back when every slot is busy so the caller can
    /// demote or requeue it.
    pub fn try_execute(self: &Arc<Self>, task: Task) -> Result<(), Task> {
        let worker_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().unwrap();
            if state.workers.len() >= state.size {
                return Err(task);
            }
            state.workers.insert(
                worker_id,
                WorkerInfo {
                    task_id: task.id.clone(),
                    started: Instant::now(),
                },
            );
        }
        self.metrics.total.fetch_add(1, Ordering::Relaxed);
        self.spawn_worker(worker_id, task);
        Ok(())
    }

    /// Submit directly to the spillover queue, bypassing the lanes.
    ///
    /// Fails only when the spillover queue itself is saturated.
    pub fn submit_direct(&self, task: Task) -> Result<(), Task> {
        self.metrics.add_queued(1);
        self.spillover_tx.try_send(task).map_err(|err| {
            self.metrics.add_queued(-1);
            warn!("pool: spillover queue saturated");
            match err {
                mpsc::error::TrySendError::Full(task)
                | mpsc::error::TrySendError::Closed(task) => task,
            }
        })
    }

    /// Wait until every in-flight worker finishes.
    ///
    /// Running tasks cannot be preempted mid-encode; this only waits.
    pub async fn drain(&self) {
        loop {
            if self.active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn start_spillover_dispatcher(self: Arc<Self>, mut rx: mpsc::Receiver<Task>) {
        tokio::spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = self.run_cancel.cancelled() => break,
                    task = rx.recv() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };
                self.metrics.add_queued(-1);
                let mut pending = task;
                loop {
                    match self.try_execute(pending) {
                        Ok(()) => break,
                        Err(task) => {
                            if self.run_cancel.is_cancelled() {
                                self.emit_terminal(task, TaskState::Canceled, "run cancelled");
                                break;
                            }
                            pending = task;
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
            // Drain whatever is left after cancellation.
            while let Ok(task) = rx.try_recv() {
                self.metrics.add_queued(-1);
                self.emit_terminal(task, TaskState::Canceled, "run cancelled");
            }
        });
    }

    fn spawn_worker(self: &Arc<Self>, worker_id: Uuid, task: Task) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let wait_ms = task.created_at.elapsed().as_millis() as u64;
            pool.metrics.wait_ms_sum.fetch_add(wait_ms, Ordering::Relaxed);
            pool.metrics.active.fetch_add(1, Ordering::Relaxed);
            let _ = pool.events.send(PoolEvent::Started {
                task_id: task.id.clone(),
                path: task.file.path.clone(),
            });

            let task_cancel = pool.run_cancel.child_token();
            let started = Instant::now();
            let result = pool.executor.execute(&task, task_cancel).await;
            let exec_ms = started.elapsed().as_millis() as u64;

            let state = if result.skipped {
                TaskState::Skipped
            } else if result.success {
                TaskState::Completed
            } else if pool.run_cancel.is_cancelled() {
                TaskState::Canceled
            } else {
                TaskState::Failed
            };
            match state {
                TaskState::Completed | TaskState::Skipped => {
                    pool.metrics.completed.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    pool.metrics.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            pool.metrics.exec_ms_sum.fetch_add(exec_ms, Ordering::Relaxed);
            pool.metrics.finished.fetch_add(1, Ordering::Relaxed);
            pool.metrics.active.fetch_sub(1, Ordering::Relaxed);
            pool.state.lock().unwrap().workers.remove(&worker_id);

            let _ = pool.events.send(PoolEvent::Finished {
                task_id: task.id.clone(),
                state,
                result,
            });
        });
    }

    /// Emit a terminal event for a task that never ran.
    pub(super) fn emit_terminal(&self, task: Task, state: TaskState, reason: &str) {
        let result = crate::core::media::ConversionResult::failed(
            &task.file.path,
            task.file.size,
            task.operation.method_tag(),
            reason,
        );
        match state {
            TaskState::Completed | TaskState::Skipped => {
                self.metrics.completed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics.total.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(PoolEvent::Finished {
            task_id: task.id,
            state,
            result,
        });
    }

    /// Ids and runtimes of currently active workers.
    pub fn list_active(&self) -> Vec<(String, Duration)> {
        let state = self.state.lock().unwrap();
        state
            .workers
            .values()
            .map(|info| (info.task_id.clone(), info.started.elapsed()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::{ConversionResult, MediaInfo, MediaKind};
    use crate::core::pool::task::TaskPriority;
    use crate::core::strategy::Operation;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    struct SleepyExecutor {
        delay: Duration,
    }

    #[async_trait]
    impl TaskExecutor for SleepyExecutor {
        async fn execute(&self, task: &Task, _cancel: CancellationToken) -> ConversionResult {
            tokio::time::sleep(self.delay).await;
            ConversionResult::skipped(&task.file.path, task.file.size, "test")
        }
    }

    fn test_task(name: &str) -> Task {
        let file = crate::core::media::MediaFile {
            path: PathBuf::from(format!("/data/{name}")),
            base_name: name.to_string(),
            size: 10,
            extension: ".jpg".to_string(),
            modified: UNIX_EPOCH,
            kind: MediaKind::Image,
            corrupted: false,
            codec_incompatible: false,
            container_incompatible: false,
        };
        Task::new(
            file,
            MediaInfo::default(),
            Operation::skip("test"),
            TaskPriority::Normal,
        )
    }

    fn test_pool(size: usize, delay: Duration) -> (Arc<WorkerPool>, mpsc::UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = PoolConfig {
            initial_size: size,
            min_size: 1,
            max_size: 16,
            ..PoolConfig::default()
        };
        let pool = WorkerPool::new(
            config,
            Arc::new(SleepyExecutor { delay }),
            tx,
            CancellationToken::new(),
        );
        (pool, rx)
    }

    #[tokio::test]
    async fn test_execute_and_complete() {
        let (pool, mut rx) = test_pool(2, Duration::from_millis(5));
        pool.try_execute(test_task("a.jpg")).unwrap();

        let started = rx.recv().await.unwrap();
        assert!(matches!(started, PoolEvent::Started { .. }));
        let finished = rx.recv().await.unwrap();
        match finished {
            PoolEvent::Finished { state, result, .. } => {
                assert_eq!(state, TaskState::Skipped);
                assert!(result.skipped);
            }
            other => panic!("expected finished, got {other:?}"),
        }
        pool.drain().await;
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let (pool, _rx) = test_pool(1, Duration::from_millis(100));
        pool.try_execute(test_task("a.jpg")).unwrap();
        let rejected = pool.try_execute(test_task("b.jpg"));
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn test_spillover_dispatches_when_slot_frees() {
        let (pool, mut rx) = test_pool(1, Duration::from_millis(20));
        pool.try_execute(test_task("a.jpg")).unwrap();
        pool.submit_direct(test_task("b.jpg")).unwrap();

        let mut finished = 0;
        while finished < 2 {
            if let Some(PoolEvent::Finished { .. }) = rx.recv().await {
                finished += 1;
            }
        }
        let metrics = pool.metrics();
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.queued, 0);
    }

    #[tokio::test]
    async fn test_scale_clamps_to_bounds() {
        let (pool, _rx) = test_pool(2, Duration::from_millis(1));
        pool.scale_to(1000);
        assert_eq!(pool.current_size(), 16);
        pool.scale_to(0);
        assert_eq!(pool.current_size(), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_totals() {
        let (pool, mut rx) = test_pool(4, Duration::from_millis(1));
        for i in 0..4 {
            pool.try_execute(test_task(&format!("{i}.jpg"))).unwrap();
        }
        let mut finished = 0;
        while finished < 4 {
            if let Some(PoolEvent::Finished { .. }) = rx.recv().await {
                finished += 1;
            }
        }
        let metrics = pool.metrics();
        assert_eq!(metrics.total, 4);
        assert_eq!(metrics.completed, 4);
        assert_eq!(metrics.failed, 0);
    }
}
