//! Single entry point for external tool invocation.
//!
//! Every external process call in the engine flows through
//! [`ToolInvoker::invoke`], which normalizes path-looking arguments against
//! the security allow/deny lists, bounds concurrency with a global process
//! semaphore, enforces a per-invocation timeout, and retries transient
//! failures with linear backoff. Cancellation and deadline errors are
//! returned immediately without retry.

pub mod availability;

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::{SecurityConfig, ToolsConfig};
use crate::error::PixlyError;

/// The closed set of external tools the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Media introspection producing JSON with `format` and `streams[]`.
    Ffprobe,
    /// JPEG XL encoder.
    Cjxl,
    /// AVIF encoder.
    Avifenc,
    /// Media processor for repackaging and pre-decoding.
    Ffmpeg,
    /// Metadata tag-copy tool.
    Exiftool,
}

impl ToolKind {
    /// Default binary name on PATH.
    pub fn binary_name(&self) -> &'static str {
        match self {
            ToolKind::Ffprobe => "ffprobe",
            ToolKind::Cjxl => "cjxl",
            ToolKind::Avifenc => "avifenc",
            ToolKind::Ffmpeg => "ffmpeg",
            ToolKind::Exiftool => "exiftool",
        }
    }

    /// Resolve the binary to invoke from the tools configuration.
    pub fn resolve(&self, tools: &ToolsConfig) -> PathBuf {
        let configured = match self {
            ToolKind::Ffprobe => &tools.ffprobe_path,
            ToolKind::Cjxl => &tools.cjxl_path,
            ToolKind::Avifenc => &tools.avifenc_path,
            ToolKind::Ffmpeg => &tools.ffmpeg_path,
            ToolKind::Exiftool => &tools.exiftool_path,
        };
        configured
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.binary_name()))
    }
}

/// Retry behavior for transient invocation failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,
    /// Base delay; attempt `n` waits `n * base_delay` (linear backoff).
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Run-scoped invoker wrapping every external process call.
///
/// The process semaphore is authoritative for sub-parallelism: task bodies
/// that fan out internally still go through this invoker, so total child
/// processes never exceed the semaphore capacity.
pub struct ToolInvoker {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
    retry: RetryConfig,
    allowed_roots: Vec<PathBuf>,
    forbidden_roots: Vec<PathBuf>,
}

impl ToolInvoker {
    /// Create an invoker for a run rooted at `target_root`.
    ///
    /// Semaphore capacity is `min(CPU count, 8)`.
    pub fn new(security: &SecurityConfig, target_root: &Path) -> Self {
        let capacity = num_cpus::get().min(8).max(1);
        let mut allowed_roots = security.allowed_directories.clone();
        allowed_roots.push(target_root.to_path_buf());
        allowed_roots.push(std::env::temp_dir());
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            allowed_roots,
            forbidden_roots: security.forbidden_directories.clone(),
        }
    }

    /// Number of concurrent child processes the semaphore admits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Override the per-invocation timeout (tests and slow encoders).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `tool` with `args`, returning the combined stdout and stderr.
    ///
    /// Transient failures are retried up to the configured attempt count
    /// with linear backoff; cancellation and deadline errors propagate
    /// immediately.
    pub async fn invoke(
        &self,
        tool: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let args = self.normalize_args(args)?;

        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts {
            if cancel.is_cancelled() {
                return Err(PixlyError::Cancelled);
            }
            match self.invoke_once(tool, &args, cancel).await {
                Ok(output) => return Ok(output),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    warn!(
                        "tool {} failed (attempt {}/{}): {}",
                        tool.display(),
                        attempt,
                        self.retry.max_attempts,
                        err
                    );
                    last_error = Some(err);
                    if attempt < self.retry.max_attempts {
                        sleep(self.retry.base_delay * attempt as u32).await;
                    }
                }
            }
        }
        Err(last_error.expect("at least one attempt ran"))
    }

    async fn invoke_once(
        &self,
        tool: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PixlyError::concurrency("process semaphore closed"))?;

        debug!("exec: {} {}", tool.display(), args.join(" "));
        let mut command = tokio::process::Command::new(tool);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.output();
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(PixlyError::Cancelled),
            result = tokio::time::timeout(self.timeout, child) => match result {
                Err(_) => return Err(PixlyError::DeadlineExceeded(self.timeout)),
                Ok(Err(err)) => {
                    return Err(PixlyError::tool_execution(
                        tool.to_string_lossy(),
                        format!("failed to spawn: {}", err),
                    ));
                }
                Ok(Ok(output)) => output,
            },
        };

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if output.status.success() {
            Ok(combined)
        } else {
            Err(PixlyError::tool_execution(
                tool.to_string_lossy(),
                format!("{}: {}", output.status, truncate(&combined, 2048)),
            ))
        }
    }

    /// Normalize every argument that looks like a filesystem path and check
    /// it against the allow/deny lists. Non-path arguments pass through.
    fn normalize_args(&self, args: &[String]) -> Result<Vec<String>> {
        args.iter()
            .map(|arg| {
                if looks_like_path(arg) {
                    let normalized = self.validate_path(Path::new(arg))?;
                    Ok(normalized.to_string_lossy().into_owned())
                } else {
                    Ok(arg.clone())
                }
            })
            .collect()
    }

    fn validate_path(&self, path: &Path) -> Result<PathBuf> {
        let normalized = lexical_normalize(path)
            .ok_or_else(|| PixlyError::InvalidPath(path.to_path_buf()))?;
        for forbidden in &self.forbidden_roots {
            if normalized.starts_with(forbidden) {
                return Err(PixlyError::InvalidPath(normalized));
            }
        }
        if !self
            .allowed_roots
            .iter()
            .any(|root| normalized.starts_with(root))
        {
            return Err(PixlyError::InvalidPath(normalized));
        }
        Ok(normalized)
    }
}

/// Whether an argument should be treated as a filesystem path.
fn looks_like_path(arg: &str) -> bool {
    !arg.starts_with('-') && (arg.contains(std::path::MAIN_SEPARATOR) || arg.contains('/'))
}

/// Resolve `.` and `..` components without touching the filesystem.
///
/// Returns `None` when the path escapes its root through `..`.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            other => normalized.push(other),
        }
    }
    Some(normalized)
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker_for(root: &Path) -> ToolInvoker {
        ToolInvoker::new(&SecurityConfig::default(), root)
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("/data/photo.jpg"));
        assert!(looks_like_path("sub/photo.jpg"));
        assert!(!looks_like_path("--lossless"));
        assert!(!looks_like_path("444"));
        assert!(!looks_like_path("-version"));
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/a/b/./c/../d")),
            Some(PathBuf::from("/a/b/d"))
        );
        assert_eq!(lexical_normalize(Path::new("/a/../..")), None);
    }

    #[test]
    fn test_validate_path_rejects_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = invoker_for(tmp.path());
        let outside = Path::new("/somewhere/else/file.png");
        assert!(invoker.validate_path(outside).is_err());

        let inside = tmp.path().join("photos/file.png");
        assert!(invoker.validate_path(&inside).is_ok());
    }

    #[test]
    fn test_validate_path_respects_forbidden() {
        let tmp = tempfile::tempdir().unwrap();
        let security = SecurityConfig {
            allowed_directories: vec![tmp.path().to_path_buf()],
            forbidden_directories: vec![tmp.path().join("secret")],
        };
        let invoker = ToolInvoker::new(&security, tmp.path());
        assert!(
            invoker
                .validate_path(&tmp.path().join("ok/file.png"))
                .is_ok()
        );
        assert!(
            invoker
                .validate_path(&tmp.path().join("secret/file.png"))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_invoke_missing_tool_fails_without_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = invoker_for(tmp.path());
        let cancel = CancellationToken::new();
        let result = invoker
            .invoke(
                Path::new("definitely-not-a-real-binary-xyz"),
                &["--version".to_string()],
                &cancel,
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_invoke_cancelled_returns_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = invoker_for(tmp.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result =
            tokio_test::block_on(invoker.invoke(Path::new("true"), &[], &cancel));
        assert!(matches!(result, Err(PixlyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_invoke_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = invoker_for(tmp.path());
        let cancel = CancellationToken::new();
        let output = invoker
            .invoke(
                Path::new("echo"),
                &["hello".to_string(), "world".to_string()],
                &cancel,
            )
            .await
            .unwrap();
        assert!(output.contains("hello world"));
    }

    #[test]
    fn test_tool_kind_resolution() {
        let mut tools = ToolsConfig::default();
        assert_eq!(ToolKind::Cjxl.resolve(&tools), PathBuf::from("cjxl"));
        tools.cjxl_path = Some(PathBuf::from("/opt/jxl/bin/cjxl"));
        assert_eq!(
            ToolKind::Cjxl.resolve(&tools),
            PathBuf::from("/opt/jxl/bin/cjxl")
        );
    }
}
