//! Integration tests for the checkpoint store: durability across reopen,
//! transition discipline, and the resume query path.

use std::path::{Path, PathBuf};

use pixly::core::checkpoint::{CheckpointStore, SessionInfo, TransitionDetail};
use pixly::core::pool::TaskState;
use pixly::core::strategy::Mode;
use tempfile::TempDir;

fn detail(size: u64) -> TransitionDetail {
    TransitionDetail {
        size,
        ..TransitionDetail::default()
    }
}

#[test]
fn test_interrupted_run_resumes_with_pending_subset() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("conversion.db");
    let session = SessionInfo::new(tmp.path().to_path_buf(), Mode::AutoPlus);

    // First process: three files admitted, one completed, one still queued,
    // one running when the process dies.
    {
        let store = CheckpointStore::open(&db).unwrap();
        store.create_session(&session).unwrap();
        store.set_session_total(&session.id, 3).unwrap();

        let done = tmp.path().join("done.jpg");
        store
            .record_transition(&session.id, &done, TaskState::Queued, &detail(100))
            .unwrap();
        store
            .record_transition(&session.id, &done, TaskState::Running, &detail(100))
            .unwrap();
        store
            .record_transition(
                &session.id,
                &done,
                TaskState::Completed,
                &TransitionDetail {
                    size: 100,
                    output_path: Some(tmp.path().join("done.jxl")),
                    ..TransitionDetail::default()
                },
            )
            .unwrap();

        store
            .record_transition(
                &session.id,
                &tmp.path().join("queued.jpg"),
                TaskState::Queued,
                &detail(200),
            )
            .unwrap();
        store
            .record_transition(
                &session.id,
                &tmp.path().join("running.jpg"),
                TaskState::Running,
                &detail(300),
            )
            .unwrap();
        // Process dies here; every transition above was flushed.
    }

    // Second process resumes.
    let store = CheckpointStore::open(&db).unwrap();
    let loaded = store.session(&session.id).unwrap().unwrap();
    assert_eq!(loaded.total, 3);
    assert_eq!(loaded.processed, 1);
    assert_eq!(loaded.completed, 1);
    assert_eq!(loaded.mode, Mode::AutoPlus);

    let pending = store.pending_files(&session.id).unwrap();
    let pending_names: Vec<&Path> = pending.iter().map(|r| r.path.as_path()).collect();
    assert_eq!(pending.len(), 2);
    assert!(pending_names.contains(&tmp.path().join("queued.jpg").as_path()));
    assert!(pending_names.contains(&tmp.path().join("running.jpg").as_path()));
}

#[test]
fn test_completed_file_is_never_reprocessed() {
    let tmp = TempDir::new().unwrap();
    let store = CheckpointStore::open(&tmp.path().join("c.db")).unwrap();
    let session = SessionInfo::new(tmp.path().to_path_buf(), Mode::Quality);
    store.create_session(&session).unwrap();

    let path = tmp.path().join("photo.jpg");
    store
        .record_transition(&session.id, &path, TaskState::Completed, &detail(100))
        .unwrap();

    // A resume that tried to requeue the file must be refused.
    let applied = store
        .record_transition(&session.id, &path, TaskState::Queued, &detail(100))
        .unwrap();
    assert!(!applied);
    assert_eq!(
        store.file_state(&session.id, &path).unwrap(),
        Some(TaskState::Completed)
    );
    let loaded = store.session(&session.id).unwrap().unwrap();
    assert_eq!(loaded.processed, 1, "counters must not double-count");
}

#[test]
fn test_retrying_state_may_requeue() {
    let tmp = TempDir::new().unwrap();
    let store = CheckpointStore::open(&tmp.path().join("c.db")).unwrap();
    let session = SessionInfo::new(tmp.path().to_path_buf(), Mode::Quality);
    store.create_session(&session).unwrap();

    let path = tmp.path().join("flaky.jpg");
    for state in [
        TaskState::Queued,
        TaskState::Running,
        TaskState::Retrying,
        TaskState::Queued,
        TaskState::Running,
        TaskState::Completed,
    ] {
        let applied = store
            .record_transition(&session.id, &path, state, &detail(100))
            .unwrap();
        assert!(applied, "transition to {state} must be accepted");
    }
}

#[test]
fn test_session_listing_order() {
    let tmp = TempDir::new().unwrap();
    let store = CheckpointStore::open(&tmp.path().join("c.db")).unwrap();

    let older = SessionInfo::new(PathBuf::from("/a"), Mode::Quality);
    store.create_session(&older).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let newer = SessionInfo::new(PathBuf::from("/b"), Mode::Emoji);
    store.create_session(&newer).unwrap();

    let sessions = store.list_sessions().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, newer.id);
}

#[test]
fn test_error_and_output_details_persisted() {
    let tmp = TempDir::new().unwrap();
    let store = CheckpointStore::open(&tmp.path().join("c.db")).unwrap();
    let session = SessionInfo::new(tmp.path().to_path_buf(), Mode::Quality);
    store.create_session(&session).unwrap();

    let path = tmp.path().join("broken.png");
    store
        .record_transition(
            &session.id,
            &path,
            TaskState::Failed,
            &TransitionDetail {
                error: Some("encoder exited with status 1".to_string()),
                output_path: None,
                size: 555,
            },
        )
        .unwrap();

    let records = store.session_files(&session.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, TaskState::Failed);
    assert_eq!(
        records[0].error.as_deref(),
        Some("encoder exited with status 1")
    );
    assert_eq!(records[0].size, 555);
    assert!(records[0].ended_at.is_some());
}
