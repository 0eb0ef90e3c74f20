//! Comprehensive error types for the Pixly transcoding engine.
//!
//! This module defines the `PixlyError` enum covering all error conditions
//! that can occur during scanning, media probing, external tool invocation,
//! concurrent scheduling, and atomic file replacement.
//!
//! It also provides helper methods to construct errors and generate
//! user-friendly messages.
use thiserror::Error;

/// Represents all possible errors in the Pixly engine.
///
/// Each variant provides specific context to facilitate debugging and
/// user-friendly reporting.
///
/// # Examples
///
/// ```rust
/// use pixly::error::{PixlyError, PixlyResult};
///
/// fn example() -> PixlyResult<()> {
///     Err(PixlyError::Probe {
///         path: "clip.mp4".to_string(),
///         message: "no streams found".to_string(),
///     })
/// }
/// ```
///
/// # Exit Codes
///
/// Each error variant maps to an exit code via `PixlyError::exit_code`.
/// Per-file failures never reach the process exit code; only setup and
/// invariant violations do.
#[derive(Error, Debug)]
pub enum PixlyError {
    /// I/O operation failed during file system access.
    ///
    /// This variant wraps `std::io::Error` and provides context about
    /// file operations that failed.
    ///
    /// # Common Causes
    /// - Permission issues
    /// - Insufficient disk space
    /// - Network filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error due to invalid or missing settings.
    ///
    /// Contains a human-readable message describing the issue.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// File operation error: existence, permission, space, rename, or sync.
    ///
    /// Provides the operation name and a detailed message.
    #[error("File operation error [{operation}]: {message}")]
    FileOperation {
        /// The operation that failed (e.g., "rename", "sync", "space-check")
        operation: String,
        /// Detailed error message describing the issue
        message: String,
    },

    /// Media introspection failed or produced unparsable output.
    #[error("Probe error [{path}]: {message}")]
    Probe {
        /// The file being probed
        path: String,
        /// Description of the probe failure
        message: String,
    },

    /// Encoder failure, verification failure, or unsupported input.
    #[error("Conversion error [{path}]: {message}")]
    Conversion {
        /// The file being converted
        path: String,
        /// Description of the conversion failure
        message: String,
    },

    /// Queue saturation, submission failure, cancellation, or deadline.
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// An external tool exited unsuccessfully; carries the captured output.
    #[error("Tool execution failed [{tool}]: {message}")]
    ToolExecution {
        /// The tool binary that failed
        tool: String,
        /// Exit status and captured combined output
        message: String,
    },

    /// An external tool invocation was cancelled before completion.
    ///
    /// Returned immediately by the invoker without retry.
    #[error("Operation cancelled")]
    Cancelled,

    /// An external tool invocation exceeded its deadline.
    ///
    /// Returned immediately by the invoker without retry.
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// A required external tool is missing from the configuration and PATH.
    #[error("Required tool not available: {0}")]
    ToolNotAvailable(String),

    /// The specified path does not exist on the filesystem.
    #[error("Path not found: {0}")]
    PathNotFound(std::path::PathBuf),

    /// The provided path is invalid, malformed, or outside the allowed roots.
    #[error("Invalid path: {0}")]
    InvalidPath(std::path::PathBuf),

    /// Unable to read the specified directory.
    #[error("Unable to read directory: {path}")]
    DirectoryReadError {
        /// The directory path that could not be read
        path: std::path::PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint store failure (open, transaction, or flush).
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    /// Catch-all error variant wrapping any other failure.
    #[error("Unknown error: {0}")]
    Other(#[from] anyhow::Error),
}

// Convert tree-walk errors to file operation errors
impl From<walkdir::Error> for PixlyError {
    fn from(err: walkdir::Error) -> Self {
        PixlyError::FileOperation {
            operation: "walk".to_string(),
            message: err.to_string(),
        }
    }
}

// Convert store errors; the checkpoint layer is the only rusqlite consumer
impl From<rusqlite::Error> for PixlyError {
    fn from(err: rusqlite::Error) -> Self {
        PixlyError::Checkpoint(err.to_string())
    }
}

impl From<serde_json::Error> for PixlyError {
    fn from(err: serde_json::Error) -> Self {
        PixlyError::Probe {
            path: String::new(),
            message: format!("JSON parse error: {}", err),
        }
    }
}

/// Specialized `Result` type for Pixly operations.
pub type PixlyResult<T> = Result<T, PixlyError>;

impl PixlyError {
    /// Create a configuration error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pixly::error::PixlyError;
    /// let err = PixlyError::config("invalid mode");
    /// assert_eq!(err.to_string(), "Configuration error: invalid mode");
    /// ```
    pub fn config<S: Into<String>>(message: S) -> Self {
        PixlyError::Config {
            message: message.into(),
        }
    }

    /// Create a file operation error for the given operation and message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pixly::error::PixlyError;
    /// let err = PixlyError::file_operation("rename", "cross-device link");
    /// assert!(err.to_string().contains("rename"));
    /// ```
    pub fn file_operation<S1, S2>(operation: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        PixlyError::FileOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a probe error for the given path and message.
    pub fn probe<P: AsRef<std::path::Path>, S: Into<String>>(path: P, message: S) -> Self {
        PixlyError::Probe {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Create a conversion error for the given path and message.
    pub fn conversion<P: AsRef<std::path::Path>, S: Into<String>>(path: P, message: S) -> Self {
        PixlyError::Conversion {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Create a concurrency error with the given message.
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        PixlyError::Concurrency(message.into())
    }

    /// Create a tool execution error with the captured output.
    pub fn tool_execution<S1, S2>(tool: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        PixlyError::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a task submission failure for a saturated pool.
    pub fn pool_overloaded(task_id: &str) -> Self {
        PixlyError::Concurrency(format!("worker pool overloaded, task {} rejected", task_id))
    }

    /// Create a task timeout error with task ID and duration.
    pub fn task_timeout(task_id: String, duration: std::time::Duration) -> Self {
        PixlyError::Concurrency(format!("Task {} timed out (limit: {:?})", task_id, duration))
    }

    /// Whether the invoker may retry after this error.
    ///
    /// Cancellation and deadline errors are terminal and must be returned
    /// immediately; everything else is treated as transient.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            PixlyError::Cancelled | PixlyError::DeadlineExceeded(_)
        )
    }

    /// Return the corresponding exit code for this error variant.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pixly::error::PixlyError;
    /// assert_eq!(PixlyError::config("x").exit_code(), 2);
    /// ```
    pub fn exit_code(&self) -> i32 {
        match self {
            PixlyError::Io(_) => 1,
            PixlyError::Config { .. } => 2,
            PixlyError::ToolNotAvailable(_) => 3,
            PixlyError::PathNotFound(_) | PixlyError::InvalidPath(_) => 4,
            PixlyError::DirectoryReadError { .. } => 4,
            PixlyError::Checkpoint(_) => 5,
            _ => 1,
        }
    }

    /// Return a user-friendly error message with suggested remedies.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pixly::error::PixlyError;
    /// let msg = PixlyError::config("bad mode").user_friendly_message();
    /// assert!(msg.contains("Configuration error:"));
    /// ```
    pub fn user_friendly_message(&self) -> String {
        match self {
            PixlyError::Io(e) => format!("File operation error: {}", e),
            PixlyError::Config { message } => format!(
                "Configuration error: {}\nHint: run 'pixly convert --help' for valid options",
                message
            ),
            PixlyError::ToolNotAvailable(tool) => format!(
                "Required tool not available: {}\nHint: install it or set its path explicitly, then run 'pixly tools' to verify",
                tool
            ),
            PixlyError::FileOperation { operation, message } => {
                format!("File operation failed ({}): {}", operation, message)
            }
            PixlyError::Probe { path, message } => format!(
                "Media probe failed for {}: {}\nHint: the file may be corrupted",
                path, message
            ),
            PixlyError::Conversion { path, message } => {
                format!("Conversion failed for {}: {}", path, message)
            }
            PixlyError::Concurrency(msg) => msg.clone(),
            PixlyError::Checkpoint(msg) => format!(
                "Checkpoint store error: {}\nHint: remove the store directory to start a fresh session",
                msg
            ),
            PixlyError::PathNotFound(path) => format!("Path not found: {}", path.display()),
            PixlyError::InvalidPath(path) => format!("Invalid path: {}", path.display()),
            PixlyError::Other(err) => {
                format!("Unknown error: {}\nHint: please report this issue", err)
            }
            _ => format!("Error: {}", self),
        }
    }
}

// Unit test: PixlyError error types and helper methods
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_creation() {
        let error = PixlyError::config("test config error");
        assert!(matches!(error, PixlyError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_file_operation_error_creation() {
        let error = PixlyError::file_operation("rename", "permission denied");
        assert!(matches!(error, PixlyError::FileOperation { .. }));
        let msg = error.to_string();
        assert!(msg.contains("rename"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_probe_error_creation() {
        let error = PixlyError::probe("broken.gif", "no streams found");
        assert!(matches!(error, PixlyError::Probe { .. }));
        assert_eq!(
            error.to_string(),
            "Probe error [broken.gif]: no streams found"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let pixly_error: PixlyError = io_error.into();
        assert!(matches!(pixly_error, PixlyError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(PixlyError::conversion("a.png", "encoder crashed").is_transient());
        assert!(!PixlyError::Cancelled.is_transient());
        assert!(!PixlyError::DeadlineExceeded(std::time::Duration::from_secs(30)).is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PixlyError::config("test").exit_code(), 2);
        assert_eq!(
            PixlyError::ToolNotAvailable("cjxl".to_string()).exit_code(),
            3
        );
        assert_eq!(PixlyError::Checkpoint("locked".to_string()).exit_code(), 5);
        // Per-file failures map to the generic code but are never propagated
        // to the process exit.
        assert_eq!(PixlyError::conversion("x.png", "fail").exit_code(), 1);
    }

    #[test]
    fn test_user_friendly_messages() {
        let config_error = PixlyError::config("missing mode");
        let message = config_error.user_friendly_message();
        assert!(message.contains("Configuration error:"));
        assert!(message.contains("pixly convert --help"));

        let tool_error = PixlyError::ToolNotAvailable("avifenc".to_string());
        let message = tool_error.user_friendly_message();
        assert!(message.contains("avifenc"));
        assert!(message.contains("pixly tools"));
    }
}
