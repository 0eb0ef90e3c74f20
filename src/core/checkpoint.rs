//! Embedded checkpoint store.
//!
//! A single SQLite database holds two namespaces: session records and
//! per-file records. Every state transition executes in one transaction and
//! is flushed to disk before the caller returns, so an abrupt termination
//! loses at most the currently-running task. The store is single-writer per
//! process, many-reader.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::pool::TaskState;
use crate::core::strategy::Mode;
use crate::error::PixlyError;

/// Persistent run-level header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session id.
    pub id: String,
    /// The scanned target directory.
    pub target_dir: PathBuf,
    /// Mode of the run.
    pub mode: Mode,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
    /// Total files admitted to the run.
    pub total: u64,
    /// Files in any terminal state.
    pub processed: u64,
    /// Files completed successfully.
    pub completed: u64,
    /// Files failed or canceled.
    pub failed: u64,
    /// Files skipped.
    pub skipped: u64,
}

impl SessionInfo {
    /// Create a fresh session header for a run starting now.
    pub fn new(target_dir: PathBuf, mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_dir,
            mode,
            started_at: now,
            updated_at: now,
            total: 0,
            processed: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
        }
    }
}

/// One per-file record.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Absolute input path.
    pub path: PathBuf,
    /// Last recorded state.
    pub state: TaskState,
    /// When the file entered `Running`, if it did.
    pub started_at: Option<DateTime<Utc>>,
    /// When the file reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Error text for failures.
    pub error: Option<String>,
    /// Output path for completions.
    pub output_path: Option<PathBuf>,
    /// Input size in bytes.
    pub size: u64,
}

/// Extra detail carried by a transition.
#[derive(Debug, Default, Clone)]
pub struct TransitionDetail {
    /// Error message, for failures.
    pub error: Option<String>,
    /// Output path, for completions.
    pub output_path: Option<PathBuf>,
    /// Input size in bytes.
    pub size: u64,
}

/// The embedded store.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    /// Default location: `<tmp>/pixly_checkpoints/conversion.db`.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir()
            .join("pixly_checkpoints")
            .join("conversion.db")
    }

    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PixlyError::Checkpoint(format!("create store dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        // Synchronous FULL keeps the flush-before-return guarantee.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                target_dir  TEXT NOT NULL,
                mode        TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                total       INTEGER NOT NULL DEFAULT 0,
                processed   INTEGER NOT NULL DEFAULT 0,
                completed   INTEGER NOT NULL DEFAULT 0,
                failed      INTEGER NOT NULL DEFAULT 0,
                skipped     INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS file_records (
                session_id  TEXT NOT NULL,
                path        TEXT NOT NULL,
                state       TEXT NOT NULL,
                started_at  TEXT,
                ended_at    TEXT,
                error       TEXT,
                output_path TEXT,
                size        INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (session_id, path)
            );
            CREATE INDEX IF NOT EXISTS idx_file_records_session
                ON file_records (session_id, state);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write a session header at run start.
    pub fn create_session(&self, session: &SessionInfo) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sessions
             (id, target_dir, mode, started_at, updated_at, total, processed, completed, failed, skipped)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id,
                session.target_dir.to_string_lossy(),
                session.mode.to_string(),
                session.started_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
                session.total,
                session.processed,
                session.completed,
                session.failed,
                session.skipped,
            ],
        )?;
        Ok(())
    }

    /// Update the session's admitted-file total.
    pub fn set_session_total(&self, session_id: &str, total: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET total = ?2, updated_at = ?3 WHERE id = ?1",
            params![session_id, total, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record one task state transition.
    ///
    /// The per-file record and the session counters update in a single
    /// transaction. Regressive transitions are refused (the record keeps
    /// its advanced state) and reported as `false`.
    pub fn record_transition(
        &self,
        session_id: &str,
        path: &Path,
        state: TaskState,
        detail: &TransitionDetail,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let path_text = path.to_string_lossy();

        let existing: Option<String> = tx
            .query_row(
                "SELECT state FROM file_records WHERE session_id = ?1 AND path = ?2",
                params![session_id, path_text],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some(current) = &existing {
            let current: TaskState = current.parse()?;
            if !current.can_transition_to(state) && current != state {
                warn!(
                    "checkpoint: refusing regressive transition {} -> {} for {}",
                    current,
                    state,
                    path.display()
                );
                return Ok(false);
            }
        }

        let started_at = matches!(state, TaskState::Running).then(|| now.clone());
        let ended_at = state.is_terminal().then(|| now.clone());

        if existing.is_some() {
            tx.execute(
                "UPDATE file_records SET
                    state = ?3,
                    started_at = COALESCE(?4, started_at),
                    ended_at = COALESCE(?5, ended_at),
                    error = COALESCE(?6, error),
                    output_path = COALESCE(?7, output_path),
                    size = MAX(size, ?8)
                 WHERE session_id = ?1 AND path = ?2",
                params![
                    session_id,
                    path_text,
                    state.to_string(),
                    started_at,
                    ended_at,
                    detail.error,
                    detail.output_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    detail.size,
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO file_records
                 (session_id, path, state, started_at, ended_at, error, output_path, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session_id,
                    path_text,
                    state.to_string(),
                    started_at,
                    ended_at,
                    detail.error,
                    detail.output_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    detail.size,
                ],
            )?;
        }

        if state.is_terminal() {
            let column = match state {
                TaskState::Completed => "completed",
                TaskState::Skipped => "skipped",
                _ => "failed",
            };
            tx.execute(
                &format!(
                    "UPDATE sessions SET processed = processed + 1,
                            {column} = {column} + 1, updated_at = ?2
                     WHERE id = ?1"
                ),
                params![session_id, now],
            )?;
        } else {
            tx.execute(
                "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                params![session_id, now],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Load a session header by id.
    pub fn session(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, target_dir, mode, started_at, updated_at,
                    total, processed, completed, failed, skipped
             FROM sessions WHERE id = ?1",
            params![session_id],
            row_to_session,
        );
        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// All stored sessions, most recent first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_dir, mode, started_at, updated_at,
                    total, processed, completed, failed, skipped
             FROM sessions ORDER BY updated_at DESC",
        )?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Per-file records of one session still in a non-terminal state.
    pub fn pending_files(&self, session_id: &str) -> Result<Vec<FileRecord>> {
        self.files_where(
            session_id,
            "state NOT IN ('completed', 'failed', 'canceled', 'skipped')",
        )
    }

    /// Every per-file record of one session.
    pub fn session_files(&self, session_id: &str) -> Result<Vec<FileRecord>> {
        self.files_where(session_id, "1 = 1")
    }

    /// Last recorded state for one file, if any.
    pub fn file_state(&self, session_id: &str, path: &Path) -> Result<Option<TaskState>> {
        let conn = self.conn.lock().unwrap();
        let result: std::result::Result<String, _> = conn.query_row(
            "SELECT state FROM file_records WHERE session_id = ?1 AND path = ?2",
            params![session_id, path.to_string_lossy()],
            |row| row.get(0),
        );
        match result {
            Ok(state) => Ok(Some(state.parse()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove sessions with no pending files.
    pub fn prune_finished_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM sessions WHERE id NOT IN (
                 SELECT DISTINCT session_id FROM file_records
                 WHERE state NOT IN ('completed', 'failed', 'canceled', 'skipped')
             )",
            [],
        )?;
        conn.execute(
            "DELETE FROM file_records WHERE session_id NOT IN (SELECT id FROM sessions)",
            [],
        )?;
        Ok(removed)
    }

    fn files_where(&self, session_id: &str, condition: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT path, state, started_at, ended_at, error, output_path, size
             FROM file_records WHERE session_id = ?1 AND {condition}
             ORDER BY path"
        ))?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, u64>(6)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (path, state, started_at, ended_at, error, output_path, size) = row?;
            records.push(FileRecord {
                path: PathBuf::from(path),
                state: state.parse()?,
                started_at: started_at.and_then(parse_time),
                ended_at: ended_at.and_then(parse_time),
                error,
                output_path: output_path.map(PathBuf::from),
                size,
            });
        }
        Ok(records)
    }
}

fn parse_time(text: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionInfo> {
    let mode: String = row.get(2)?;
    let started: String = row.get(3)?;
    let updated: String = row.get(4)?;
    Ok(SessionInfo {
        id: row.get(0)?,
        target_dir: PathBuf::from(row.get::<_, String>(1)?),
        mode: mode.parse().unwrap_or_default(),
        started_at: parse_time(started).unwrap_or_else(Utc::now),
        updated_at: parse_time(updated).unwrap_or_else(Utc::now),
        total: row.get(5)?,
        processed: row.get(6)?,
        completed: row.get(7)?,
        failed: row.get(8)?,
        skipped: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CheckpointStore) {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::open(&tmp.path().join("conversion.db")).unwrap();
        (tmp, store)
    }

    fn session(dir: &Path) -> SessionInfo {
        SessionInfo::new(dir.to_path_buf(), Mode::Quality)
    }

    #[test]
    fn test_session_roundtrip() {
        let (tmp, store) = store();
        let info = session(tmp.path());
        store.create_session(&info).unwrap();

        let loaded = store.session(&info.id).unwrap().unwrap();
        assert_eq!(loaded.id, info.id);
        assert_eq!(loaded.mode, Mode::Quality);
        assert_eq!(loaded.target_dir, tmp.path());
        assert!(store.session("missing").unwrap().is_none());
    }

    #[test]
    fn test_transition_lifecycle_updates_counts() {
        let (tmp, store) = store();
        let info = session(tmp.path());
        store.create_session(&info).unwrap();

        let path = tmp.path().join("photo.jpg");
        let detail = TransitionDetail {
            size: 1000,
            ..TransitionDetail::default()
        };
        store
            .record_transition(&info.id, &path, TaskState::Queued, &detail)
            .unwrap();
        store
            .record_transition(&info.id, &path, TaskState::Running, &detail)
            .unwrap();
        let final_detail = TransitionDetail {
            size: 1000,
            output_path: Some(tmp.path().join("photo.jxl")),
            ..TransitionDetail::default()
        };
        store
            .record_transition(&info.id, &path, TaskState::Completed, &final_detail)
            .unwrap();

        let loaded = store.session(&info.id).unwrap().unwrap();
        assert_eq!(loaded.processed, 1);
        assert_eq!(loaded.completed, 1);
        assert_eq!(loaded.failed, 0);
        assert_eq!(
            store.file_state(&info.id, &path).unwrap(),
            Some(TaskState::Completed)
        );
    }

    #[test]
    fn test_regressive_transition_refused() {
        let (tmp, store) = store();
        let info = session(tmp.path());
        store.create_session(&info).unwrap();

        let path = tmp.path().join("photo.jpg");
        let detail = TransitionDetail::default();
        store
            .record_transition(&info.id, &path, TaskState::Completed, &detail)
            .unwrap();
        let applied = store
            .record_transition(&info.id, &path, TaskState::Running, &detail)
            .unwrap();
        assert!(!applied);
        assert_eq!(
            store.file_state(&info.id, &path).unwrap(),
            Some(TaskState::Completed)
        );
    }

    #[test]
    fn test_pending_files_excludes_terminal() {
        let (tmp, store) = store();
        let info = session(tmp.path());
        store.create_session(&info).unwrap();

        let detail = TransitionDetail::default();
        store
            .record_transition(&info.id, &tmp.path().join("a.jpg"), TaskState::Queued, &detail)
            .unwrap();
        store
            .record_transition(&info.id, &tmp.path().join("b.jpg"), TaskState::Skipped, &detail)
            .unwrap();

        let pending = store.pending_files(&info.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].path.ends_with("a.jpg"));
    }

    #[test]
    fn test_resume_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("conversion.db");
        let info = session(tmp.path());
        {
            let store = CheckpointStore::open(&db).unwrap();
            store.create_session(&info).unwrap();
            store
                .record_transition(
                    &info.id,
                    &tmp.path().join("a.jpg"),
                    TaskState::Queued,
                    &TransitionDetail::default(),
                )
                .unwrap();
        }
        let store = CheckpointStore::open(&db).unwrap();
        assert!(store.session(&info.id).unwrap().is_some());
        assert_eq!(store.pending_files(&info.id).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_finished_sessions() {
        let (tmp, store) = store();
        let done = session(tmp.path());
        store.create_session(&done).unwrap();
        store
            .record_transition(
                &done.id,
                &tmp.path().join("a.jpg"),
                TaskState::Completed,
                &TransitionDetail::default(),
            )
            .unwrap();

        let active = session(tmp.path());
        store.create_session(&active).unwrap();
        store
            .record_transition(
                &active.id,
                &tmp.path().join("b.jpg"),
                TaskState::Queued,
                &TransitionDetail::default(),
            )
            .unwrap();

        let removed = store.prune_finished_sessions().unwrap();
        assert_eq!(removed, 1);
        assert!(store.session(&done.id).unwrap().is_none());
        assert!(store.session(&active.id).unwrap().is_some());
    }
}
