//! Atomic replacement of originals by encoded artifacts.
//!
//! Every successful encode ends here. The six-step protocol guarantees that
//! the final path holds either the fully written new artifact or the
//! untouched original, never a half-written temp:
//!
//! 1. the encoder writes the temp at `<target>.tmp.<timestamp>`;
//! 2. the temp's bytes are flushed to stable storage;
//! 3. the temp is closed (and metadata is transferred onto it);
//! 4. the temp is renamed over the target (atomic on a local filesystem);
//! 5. the containing directory is synced so the rename is durable;
//! 6. the result is verified (exists, size > 0, size-ratio warning).
//!
//! The same rename-based atomicity backs the corrupted-file trash move.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::ToolsConfig;
use crate::error::PixlyError;
use crate::services::invoker::{ToolInvoker, ToolKind};

/// Reserve this much beyond the doubled content size.
const SPACE_SAFETY_FLOOR: u64 = 1024 * 1024 * 1024;

/// Warn when the artifact exceeds this multiple of the original.
const SIZE_RATIO_WARN: f64 = 4.0;

/// Timestamps captured from the original before replacement.
#[derive(Debug, Clone)]
pub struct FileTimes {
    accessed: Option<SystemTime>,
    modified: Option<SystemTime>,
}

/// Snapshot the original's timestamps (best effort).
pub fn read_file_times(path: &Path) -> FileTimes {
    let meta = fs::metadata(path).ok();
    FileTimes {
        accessed: meta.as_ref().and_then(|m| m.accessed().ok()),
        modified: meta.as_ref().and_then(|m| m.modified().ok()),
    }
}

/// Apply a timestamp snapshot onto the replacement artifact.
pub fn apply_file_times(path: &Path, times: &FileTimes) -> Result<()> {
    if let (Some(accessed), Some(modified)) = (times.accessed, times.modified) {
        let atime = filetime::FileTime::from_system_time(accessed);
        let mtime = filetime::FileTime::from_system_time(modified);
        filetime::set_file_times(path, atime, mtime)
            .map_err(|e| PixlyError::file_operation("timestamps", e.to_string()))?;
    } else if let Some(modified) = times.modified {
        let current = fs::metadata(path)
            .ok()
            .and_then(|m| m.accessed().ok())
            .unwrap_or_else(SystemTime::now);
        filetime::set_file_times(
            path,
            filetime::FileTime::from_system_time(current),
            filetime::FileTime::from_system_time(modified),
        )
        .map_err(|e| PixlyError::file_operation("timestamps", e.to_string()))?;
    }
    Ok(())
}

/// Temp path for the main artifact: `<target>.tmp.<millis>`.
pub fn temp_path(target: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".tmp.{millis}"));
    PathBuf::from(name)
}

/// Temp path for one lossy probe: `<target>._probe_q<N>`.
pub fn probe_temp_path(target: &Path, quality: u8) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!("._probe_q{quality}"));
    PathBuf::from(name)
}

/// Pre-write disk-space check: twice the content size plus a 1 GiB floor.
pub fn check_disk_space(dir: &Path, content_size: u64) -> Result<()> {
    let available = fs2::available_space(dir)
        .map_err(|e| PixlyError::file_operation("space-check", e.to_string()))?;
    let required = content_size.saturating_mul(2).saturating_add(SPACE_SAFETY_FLOOR);
    if available < required {
        return Err(PixlyError::file_operation(
            "space-check",
            format!(
                "need {} bytes free in {}, only {} available",
                required,
                dir.display(),
                available
            ),
        ));
    }
    Ok(())
}

/// Installs verified artifacts over their targets.
pub struct Replacer {
    invoker: std::sync::Arc<ToolInvoker>,
    exiftool: PathBuf,
    exiftool_available: bool,
    keep_original: bool,
}

impl Replacer {
    /// Create a replacer; `keep_original` disables original deletion on the
    /// non-in-place branch.
    pub fn new(
        invoker: std::sync::Arc<ToolInvoker>,
        tools: &ToolsConfig,
        keep_original: bool,
    ) -> Self {
        let exiftool = ToolKind::Exiftool.resolve(tools);
        let exiftool_available =
            crate::services::invoker::availability::check_tool(&exiftool).available;
        Self {
            invoker,
            exiftool,
            exiftool_available,
            keep_original,
        }
    }

    /// Install `temp` at `target`, transferring metadata from `original`.
    ///
    /// Runs steps 2 through 6 of the protocol (the encoder already performed
    /// step 1). Returns the installed artifact's size. On any error the temp
    /// is removed and the target is untouched.
    pub async fn install(
        &self,
        temp: &Path,
        target: &Path,
        original: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let result = self.install_inner(temp, target, original, cancel).await;
        if result.is_err() {
            let _ = fs::remove_file(temp);
        }
        result
    }

    async fn install_inner(
        &self,
        temp: &Path,
        target: &Path,
        original: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let original_size = fs::metadata(original).map(|m| m.len()).ok();
        let times = read_file_times(original);

        // Step 2: flush the temp's bytes to stable storage.
        let file = File::open(temp)
            .map_err(|e| PixlyError::file_operation("open-temp", e.to_string()))?;
        file.sync_all()
            .map_err(|e| PixlyError::file_operation("sync", e.to_string()))?;
        // Step 3: close the temp.
        drop(file);

        // Metadata transfer runs between close and rename; a failure is
        // demoted to the timestamp fallback, never a task failure.
        self.transfer_metadata(original, temp, cancel).await;

        // Step 4: atomic rename over the target.
        fs::rename(temp, target).map_err(|e| {
            PixlyError::file_operation(
                "rename",
                format!("{} -> {}: {}", temp.display(), target.display(), e),
            )
        })?;

        // Step 5: sync the containing directory.
        if let Some(parent) = target.parent() {
            sync_dir(parent)?;
        }

        // Step 6: verify.
        let final_size = self.verify(target, original_size)?;

        // Non-in-place branch: the original survives only when asked to.
        if target != original && !self.keep_original {
            fs::remove_file(original)
                .map_err(|e| PixlyError::file_operation("remove-original", e.to_string()))?;
        }

        if let Err(err) = apply_file_times(target, &times) {
            debug!("timestamp preservation failed for {}: {}", target.display(), err);
        }
        Ok(final_size)
    }

    fn verify(&self, target: &Path, original_size: Option<u64>) -> Result<u64> {
        let metadata = fs::metadata(target)
            .map_err(|e| PixlyError::file_operation("verify", e.to_string()))?;
        let size = metadata.len();
        if size == 0 {
            return Err(PixlyError::file_operation(
                "verify",
                format!("{} is empty after replacement", target.display()),
            ));
        }
        if let Some(original) = original_size {
            if original > 0 && size as f64 > original as f64 * SIZE_RATIO_WARN {
                warn!(
                    "verify: {} grew to {} bytes, more than {}x the original {}",
                    target.display(),
                    size,
                    SIZE_RATIO_WARN,
                    original
                );
            }
        }
        Ok(size)
    }

    /// Copy tags from the original onto the temp artifact.
    ///
    /// Failure is logged and demoted: the filesystem timestamps applied
    /// after installation are the fallback.
    async fn transfer_metadata(&self, original: &Path, temp: &Path, cancel: &CancellationToken) {
        if !self.exiftool_available {
            return;
        }
        let args = vec![
            "-TagsFromFile".to_string(),
            original.to_string_lossy().into_owned(),
            "-all:all".to_string(),
            "-overwrite_original".to_string(),
            temp.to_string_lossy().into_owned(),
        ];
        if let Err(err) = self.invoker.invoke(&self.exiftool, &args, cancel).await {
            warn!(
                "metadata copy failed for {}: {}; keeping timestamps only",
                original.display(),
                err
            );
        }
    }
}

/// Atomically move a corrupted file into a sibling `.trash/` directory.
///
/// Returns the file's new path. Collisions get a timestamp suffix.
pub fn move_to_trash(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| PixlyError::InvalidPath(path.to_path_buf()))?;
    let trash_dir = parent.join(".trash");
    fs::create_dir_all(&trash_dir)
        .map_err(|e| PixlyError::file_operation("trash-mkdir", e.to_string()))?;

    let name = path
        .file_name()
        .ok_or_else(|| PixlyError::InvalidPath(path.to_path_buf()))?;
    let mut destination = trash_dir.join(name);
    if destination.exists() {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let mut renamed = name.to_os_string();
        renamed.push(format!(".{millis}"));
        destination = trash_dir.join(renamed);
    }
    fs::rename(path, &destination)
        .map_err(|e| PixlyError::file_operation("trash-move", e.to_string()))?;
    sync_dir(parent)?;
    Ok(destination)
}

/// Fsync a directory so a rename inside it is durable.
fn sync_dir(dir: &Path) -> Result<()> {
    // Directory fsync is a unix concept; elsewhere the rename itself is the
    // best available guarantee.
    #[cfg(unix)]
    {
        let handle = File::open(dir)
            .map_err(|e| PixlyError::file_operation("sync-dir", e.to_string()))?;
        handle
            .sync_all()
            .map_err(|e| PixlyError::file_operation("sync-dir", e.to_string()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
