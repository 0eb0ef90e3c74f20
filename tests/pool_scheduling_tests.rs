//! Integration tests for the work pool: fairness, priority strictness,
//! backpressure bounds, dynamic sizing, and the cancellation invariant.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, UNIX_EPOCH};

use async_trait::async_trait;
use pixly::core::media::{ConversionResult, MediaFile, MediaInfo, MediaKind};
use pixly::core::pool::{
    PoolConfig, PoolEvent, PoolHandle, Task, TaskExecutor, TaskPriority, TaskState,
};
use pixly::core::strategy::Operation;
use pixly::core::watchdog::ResourceGovernor;
use tokio_util::sync::CancellationToken;

struct RecordingExecutor {
    order: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &Task, _cancel: CancellationToken) -> ConversionResult {
        self.order.lock().unwrap().push(task.file.base_name.clone());
        tokio::time::sleep(self.delay).await;
        ConversionResult::skipped(&task.file.path, task.file.size, "test")
    }
}

fn task(name: &str) -> Task {
    let file = MediaFile {
        path: PathBuf::from(format!("/data/{name}")),
        base_name: name.to_string(),
        size: 100,
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

fn harness(
    pool_size: usize,
    delay_ms: u64,
) -> (PoolHandle, Arc<Mutex<Vec<String>>>, CancellationToken) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let config = PoolConfig {
        initial_size: pool_size,
        min_size: 1,
        max_size: 8,
        priority_queue_capacity: 128,
        ..PoolConfig::default()
    };
    let handle = PoolHandle::build(
        config,
        Arc::new(RecordingExecutor {
            order: Arc::clone(&order),
            delay: Duration::from_millis(delay_ms),
        }),
        Arc::new(ResourceGovernor::default()),
        cancel.clone(),
    );
    (handle, order, cancel)
}

async fn wait_finished(handle: &PoolHandle, count: usize) -> Vec<(TaskState, ConversionResult)> {
    let mut events = handle.events.lock().await;
    let mut finished = Vec::new();
    while finished.len() < count {
        match events.recv().await {
            Some(PoolEvent::Finished { state, result, .. }) => finished.push((state, result)),
            Some(_) => {}
            None => break,
        }
    }
    finished
}

#[tokio::test]
async fn test_fifo_order_within_priority() {
    let (handle, order, _cancel) = harness(1, 2);
    for i in 0..8 {
        let outcome = handle
            .scheduler
            .submit_with_priority(task(&format!("{i:02}.jpg")), TaskPriority::Normal)
            .await;
        assert!(outcome.is_accepted());
    }
    wait_finished(&handle, 8).await;

    let order = order.lock().unwrap();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(*order, sorted, "same-lane tasks must dispatch in FIFO order");
}

#[tokio::test]
async fn test_priority_strictness_at_dequeue() {
    let (handle, order, _cancel) = harness(1, 15);
    // Occupy the single worker first.
    handle
        .scheduler
        .submit_with_priority(task("warmup.jpg"), TaskPriority::Normal)
        .await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    // While the worker is busy, queue low before critical.
    for i in 0..3 {
        handle
            .scheduler
            .submit_with_priority(task(&format!("low{i}.jpg")), TaskPriority::Low)
            .await;
    }
    handle
        .scheduler
        .submit_with_priority(task("critical.jpg"), TaskPriority::Critical)
        .await;

    wait_finished(&handle, 5).await;
    let order = order.lock().unwrap();
    let critical_pos = order.iter().position(|n| n == "critical.jpg").unwrap();
    for i in 0..3 {
        let low_pos = order.iter().position(|n| n == &format!("low{i}.jpg")).unwrap();
        assert!(
            critical_pos < low_pos,
            "no low task may dispatch while critical is queued: {order:?}"
        );
    }
}

#[tokio::test]
async fn test_backpressure_submit_never_blocks_indefinitely() {
    let (handle, _order, _cancel) = harness(1, 40);
    let config = PoolConfig::default();

    for i in 0..50 {
        let start = Instant::now();
        let outcome = handle
            .scheduler
            .submit_with_priority(task(&format!("{i}.jpg")), TaskPriority::Normal)
            .await;
        assert!(outcome.is_accepted());
        // Bounded by the enqueue timeout plus one worker submission.
        assert!(
            start.elapsed() < config.enqueue_timeout + Duration::from_millis(100),
            "submit {i} took {:?}",
            start.elapsed()
        );
    }
}

#[tokio::test]
async fn test_cancellation_terminalizes_every_observed_task() {
    let (handle, _order, cancel) = harness(1, 25);
    let submitted = 10u64;
    for i in 0..submitted {
        handle
            .scheduler
            .submit_with_priority(task(&format!("{i}.jpg")), TaskPriority::Normal)
            .await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let finished = wait_finished(&handle, submitted as usize).await;
    assert_eq!(finished.len() as u64, submitted);
    for (state, _) in &finished {
        assert!(state.is_terminal());
    }
    handle.pool.drain().await;
    let metrics = handle.pool.metrics();
    assert_eq!(metrics.completed + metrics.failed, submitted);
    assert_eq!(metrics.queued, 0);
}

#[tokio::test]
async fn test_pool_resize_respects_bounds() {
    let (handle, _order, _cancel) = harness(2, 1);
    handle.pool.scale_to(100);
    assert_eq!(handle.pool.current_size(), 8);
    handle.pool.scale_to(0);
    assert_eq!(handle.pool.current_size(), 1);
}
