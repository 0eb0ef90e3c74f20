//! Task definitions for the work pool.
//!
//! A [`Task`] is a scheduling record: a unique id, the owned media file and
//! probe info, the operation the strategy chose, a priority, and a state
//! machine whose transitions drive the checkpoint store.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::media::{ConversionResult, MediaFile, MediaInfo};
use crate::core::strategy::Operation;

/// Priority levels for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Background work.
    Low = 0,
    /// Default for conversions.
    Normal = 1,
    /// Preferred dispatch.
    High = 2,
    /// Dispatched before everything else.
    Critical = 3,
}

impl TaskPriority {
    /// All lanes in dispatch order (critical first).
    pub const LANES: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    /// One level lower, or `None` at the bottom.
    pub fn demoted(self) -> Option<Self> {
        match self {
            TaskPriority::Critical => Some(TaskPriority::High),
            TaskPriority::High => Some(TaskPriority::Normal),
            TaskPriority::Normal => Some(TaskPriority::Low),
            TaskPriority::Low => None,
        }
    }

    /// Index into per-lane storage.
    pub fn lane_index(self) -> usize {
        self as usize
    }
}

/// State of a task in the pool.
///
/// The checkpoint store is append-only with respect to state advancement;
/// regressive transitions are forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet queued.
    Pending,
    /// Sitting in a priority lane or the spillover queue.
    Queued,
    /// A worker is executing it.
    Running,
    /// Finished with an installed artifact.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Terminated by cancellation.
    Canceled,
    /// Resolved without work.
    Skipped,
    /// Waiting for another attempt after a transient failure.
    Retrying,
}

impl TaskState {
    /// Whether this state ends the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Skipped
        )
    }

    /// Whether moving to `next` advances the state machine.
    ///
    /// Terminal states accept no successor; `Retrying` may only return to
    /// `Queued` or `Running`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (TaskState::Pending, TaskState::Queued)
            | (TaskState::Pending, TaskState::Running)
            | (TaskState::Pending, TaskState::Skipped)
            | (TaskState::Pending, TaskState::Canceled)
            | (TaskState::Pending, TaskState::Failed)
            | (TaskState::Queued, TaskState::Running)
            | (TaskState::Queued, TaskState::Canceled)
            | (TaskState::Queued, TaskState::Failed)
            | (TaskState::Running, TaskState::Completed)
            | (TaskState::Running, TaskState::Failed)
            | (TaskState::Running, TaskState::Canceled)
            | (TaskState::Running, TaskState::Skipped)
            | (TaskState::Running, TaskState::Retrying)
            | (TaskState::Retrying, TaskState::Queued)
            | (TaskState::Retrying, TaskState::Running)
            | (TaskState::Retrying, TaskState::Canceled)
            | (TaskState::Retrying, TaskState::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Skipped => "skipped",
            TaskState::Retrying => "retrying",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TaskState {
    type Err = crate::error::PixlyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "canceled" => Ok(TaskState::Canceled),
            "skipped" => Ok(TaskState::Skipped),
            "retrying" => Ok(TaskState::Retrying),
            other => Err(crate::error::PixlyError::concurrency(format!(
                "unknown task state: {other}"
            ))),
        }
    }
}

/// One unit of scheduled work, owned by the pool after submission.
#[derive(Debug)]
pub struct Task {
    /// Unique id within the session.
    pub id: String,
    /// The input file.
    pub file: MediaFile,
    /// Probe-derived description.
    pub info: MediaInfo,
    /// The operation the strategy engine chose.
    pub operation: Operation,
    /// Priority lane the producer requested.
    pub priority: TaskPriority,
    /// Creation time, for wait-time metrics.
    pub created_at: Instant,
}

impl Task {
    /// Create a task for one file.
    pub fn new(
        file: MediaFile,
        info: MediaInfo,
        operation: Operation,
        priority: TaskPriority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file,
            info,
            operation,
            priority,
            created_at: Instant::now(),
        }
    }
}

/// Executes the operation carried by a task.
///
/// The pool dispatches on the operation variant; the single implementation
/// lives in the pipeline, which owns the encoders and the replacer.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task to completion, honoring the cancellation token.
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> ConversionResult;
}

/// Event emitted by the pool as tasks move through their lifecycle.
#[derive(Debug)]
pub enum PoolEvent {
    /// A worker picked the task up.
    Started {
        /// Task id.
        task_id: String,
        /// The file being processed.
        path: std::path::PathBuf,
    },
    /// The task reached a terminal state.
    Finished {
        /// Task id.
        task_id: String,
        /// Terminal state.
        state: TaskState,
        /// The operation outcome.
        result: ConversionResult,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn test_priority_demotion_chain() {
        assert_eq!(TaskPriority::Critical.demoted(), Some(TaskPriority::High));
        assert_eq!(TaskPriority::Normal.demoted(), Some(TaskPriority::Low));
        assert_eq!(TaskPriority::Low.demoted(), None);
    }

    #[test]
    fn test_terminal_states_accept_no_successor() {
        for terminal in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Canceled,
            TaskState::Skipped,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TaskState::Running));
            assert!(!terminal.can_transition_to(TaskState::Queued));
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Queued));
        assert!(TaskState::Queued.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Retrying));
        assert!(TaskState::Retrying.can_transition_to(TaskState::Queued));
    }

    #[test]
    fn test_regressive_transitions_rejected() {
        assert!(!TaskState::Running.can_transition_to(TaskState::Queued));
        assert!(!TaskState::Queued.can_transition_to(TaskState::Pending));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            TaskState::Pending,
            TaskState::Queued,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Canceled,
            TaskState::Skipped,
            TaskState::Retrying,
        ] {
            assert_eq!(state.to_string().parse::<TaskState>().unwrap(), state);
        }
    }
}
