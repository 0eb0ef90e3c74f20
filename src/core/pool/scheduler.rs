//! Priority-aware task scheduler.
//!
//! Four bounded lanes (critical, high, normal, low) feed a single scheduler
//! loop that drains them in strict priority order and hands tasks to the
//! worker pool one at a time. Saturated lanes spill over into direct pool
//! submission after the enqueue timeout, so a full queue never stalls the
//! producer indefinitely.
//!
//! Every scale interval the loop compares the queued/size ratio against the
//! thresholds and resizes the pool by 25% steps; the resource governor can
//! force the downward direction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::config::PoolConfig;
use super::task::{Task, TaskPriority, TaskState};
use super::worker::WorkerPool;
use crate::core::watchdog::{PressureLevel, ResourceGovernor};

/// Idle sleep between drain sweeps when all lanes are empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Priority scheduler in front of a [`WorkerPool`].
pub struct TaskScheduler {
    lanes_tx: Vec<mpsc::Sender<Task>>,
    pool: Arc<WorkerPool>,
    config: PoolConfig,
    run_cancel: CancellationToken,
}

impl TaskScheduler {
    /// Create the scheduler and start its drain and scaling loops.
    pub fn new(
        pool: Arc<WorkerPool>,
        config: PoolConfig,
        governor: Arc<ResourceGovernor>,
        run_cancel: CancellationToken,
    ) -> Arc<Self> {
        let mut lanes_tx = Vec::with_capacity(4);
        let mut lanes_rx = Vec::with_capacity(4);
        for _ in 0..4 {
            let (tx, rx) = mpsc::channel::<Task>(config.priority_queue_capacity);
            lanes_tx.push(tx);
            lanes_rx.push(rx);
        }
        let scheduler = Arc::new(Self {
            lanes_tx,
            pool,
            config,
            run_cancel,
        });
        scheduler.clone().start_drain_loop(lanes_rx);
        scheduler.clone().start_scaling_loop(governor);
        scheduler
    }

    /// Submit without a priority: straight to the worker pool.
    pub fn submit(&self, task: Task) -> Result<(), Task> {
        self.pool.submit_direct(task)
    }

    /// Submit into a priority lane.
    ///
    /// Waits at most the enqueue timeout for lane space (polling at the
    /// retry interval), then falls back to direct pool submission. The
    /// return distinguishes the two paths for the caller's bookkeeping.
    pub async fn submit_with_priority(
        &self,
        mut task: Task,
        priority: TaskPriority,
    ) -> SubmitOutcome {
        task.priority = priority;
        let deadline = Instant::now() + self.config.enqueue_timeout;
        let lane = &self.lanes_tx[priority.lane_index()];
        loop {
            match lane.try_send(task) {
                Ok(()) => {
                    self.pool.metrics_handle().add_queued(1);
                    return SubmitOutcome::Queued;
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    return SubmitOutcome::Rejected(returned);
                }
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        // Bypass the lanes so the producer keeps moving.
                        return match self.pool.submit_direct(returned) {
                            Ok(()) => SubmitOutcome::Spilled,
                            Err(rejected) => SubmitOutcome::Rejected(rejected),
                        };
                    }
                    task = returned;
                    tokio::time::sleep(self.config.enqueue_retry_interval).await;
                }
            }
        }
    }

    fn start_drain_loop(self: Arc<Self>, mut lanes_rx: Vec<mpsc::Receiver<Task>>) {
        tokio::spawn(async move {
            loop {
                if self.run_cancel.is_cancelled() {
                    self.drain_to_failed(&mut lanes_rx);
                    return;
                }

                // Never pull a task out of its lane while no worker slot is
                // free: strict priority holds at dequeue time, so a critical
                // task arriving during the wait still goes first.
                if !self.pool.has_capacity() {
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }

                let mut dispatched = false;
                // Strict priority: critical down to low, one task at a time.
                for priority in TaskPriority::LANES {
                    match lanes_rx[priority.lane_index()].try_recv() {
                        Ok(task) => {
                            self.pool.metrics_handle().add_queued(-1);
                            self.dispatch(task).await;
                            dispatched = true;
                            break;
                        }
                        Err(mpsc::error::TryRecvError::Empty)
                        | Err(mpsc::error::TryRecvError::Disconnected) => {}
                    }
                }
                if !dispatched {
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        });
    }

    /// Hand one task to the pool, demoting on overload.
    async fn dispatch(&self, task: Task) {
        match self.pool.try_execute(task) {
            Ok(()) => {}
            Err(mut task) => match task.priority.demoted() {
                Some(lower) => {
                    debug!(
                        "scheduler: pool overloaded, demoting task {} to {:?}",
                        task.id, lower
                    );
                    task.priority = lower;
                    let lane = &self.lanes_tx[lower.lane_index()];
                    match lane.try_send(task) {
                        Ok(()) => self.pool.metrics_handle().add_queued(1),
                        Err(mpsc::error::TrySendError::Full(task))
                        | Err(mpsc::error::TrySendError::Closed(task)) => {
                            if let Err(task) = self.pool.submit_direct(task) {
                                warn!("scheduler: demotion target saturated, task failed");
                                self.pool.emit_terminal(
                                    task,
                                    TaskState::Failed,
                                    "worker pool overloaded",
                                );
                            }
                        }
                    }
                    // Give the pool a beat before the next attempt.
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
                None => {
                    warn!("scheduler: task {} overloaded at lowest priority", task.id);
                    self.pool
                        .emit_terminal(task, TaskState::Failed, "worker pool overloaded");
                }
            },
        }
    }

    /// After cancellation, every queued task becomes failed.
    fn drain_to_failed(&self, lanes_rx: &mut [mpsc::Receiver<Task>]) {
        for rx in lanes_rx.iter_mut() {
            while let Ok(task) = rx.try_recv() {
                self.pool.metrics_handle().add_queued(-1);
                self.pool
                    .emit_terminal(task, TaskState::Canceled, "run cancelled");
            }
        }
    }

    fn start_scaling_loop(self: Arc<Self>, governor: Arc<ResourceGovernor>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.scale_interval);
            tick.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = self.run_cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }

                let size = self.pool.current_size();
                let queued = self.pool.metrics_handle().queued_now();
                let utilization = queued as f64 / size.max(1) as f64;

                if governor.pressure() == PressureLevel::Critical {
                    self.pool.scale_to(self.config.shrunk(size));
                    continue;
                }
                if utilization > self.config.scale_up_threshold {
                    self.pool.scale_to(self.config.grown(size));
                } else if utilization < self.config.scale_down_threshold {
                    self.pool.scale_to(self.config.shrunk(size));
                }
            }
        });
    }
}

/// How a priority submission landed.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Entered the requested lane.
    Queued,
    /// Lane saturated past the timeout; went straight to the pool.
    Spilled,
    /// Both the lane and the spillover queue rejected it.
    Rejected(Task),
}

impl SubmitOutcome {
    /// Whether the task is now owned by the scheduler or pool.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SubmitOutcome::Rejected(_))
    }
}

/// Scheduler plus pool, wired together for a run.
///
/// Owning both halves keeps construction in one place and gives the
/// pipeline a single handle.
pub struct PoolHandle {
    /// The scheduler front end.
    pub scheduler: Arc<TaskScheduler>,
    /// The pool back end.
    pub pool: Arc<WorkerPool>,
    /// Receiver for lifecycle events, consumed by the pipeline.
    pub events: Mutex<mpsc::UnboundedReceiver<super::task::PoolEvent>>,
}

impl PoolHandle {
    /// Build a pool and scheduler pair for a run.
    pub fn build(
        config: PoolConfig,
        executor: Arc<dyn super::task::TaskExecutor>,
        governor: Arc<ResourceGovernor>,
        run_cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(config.clone(), executor, events_tx, run_cancel.clone());
        let scheduler = TaskScheduler::new(Arc::clone(&pool), config, governor, run_cancel);
        Self {
            scheduler,
            pool,
            events: Mutex::new(events_rx),
        }
    }
}
