//! Data model for scanned media files and probe results.
//!
//! The scanner produces owned [`MediaFile`] values; the classifier is the
//! only component that mutates them (setting the late-bound corruption and
//! compatibility flags); the strategy engine and the work pool consume them
//! read-only. Components refer to files by path or task id, never by shared
//! pointer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Recognized still-image extensions, lowercase with the leading dot.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tif", ".tiff", ".heic", ".heif", ".avif",
    ".jxl",
];

/// Recognized video extensions, lowercase with the leading dot.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".mov", ".m4v", ".avi", ".mkv", ".webm", ".flv", ".wmv", ".mpg", ".mpeg", ".ts",
    ".3gp",
];

/// Extensions whose formats are animated by default.
///
/// Used for the fixed frame-count guess when a file is trusted without a
/// deep probe.
pub const ANIMATED_EXTENSIONS: &[&str] = &[".gif", ".webp"];

/// Inferred top-level kind of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still or animated image.
    Image,
    /// Video container.
    Video,
    /// Not recognized; filtered out before the strategy engine.
    Unknown,
}

impl MediaKind {
    /// Classify a lowercase dotted extension.
    pub fn from_extension(ext: &str) -> Self {
        if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            MediaKind::Video
        } else {
            MediaKind::Unknown
        }
    }
}

/// Identity of one input file, created by the scanner.
///
/// The three `corrupted` / `codec_incompatible` / `container_incompatible`
/// flags are late-bound: false at creation, set only by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    /// Absolute, normalized path.
    pub path: PathBuf,
    /// File name without directory components.
    pub base_name: String,
    /// Size in bytes at scan time.
    pub size: u64,
    /// Lowercase extension including the leading dot; empty when absent.
    pub extension: String,
    /// Modification timestamp at scan time.
    pub modified: SystemTime,
    /// Inferred kind.
    pub kind: MediaKind,
    /// Set by the classifier when the probe fails or the file is empty.
    pub corrupted: bool,
    /// Set when the codec cannot enter the mode's target container.
    pub codec_incompatible: bool,
    /// Set when the container itself is unusable for the target.
    pub container_incompatible: bool,
}

impl MediaFile {
    /// Build a `MediaFile` from a path and its filesystem metadata.
    pub fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let base_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let kind = MediaKind::from_extension(&extension);
        Self {
            path,
            base_name,
            size: metadata.len(),
            extension,
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            kind,
            corrupted: false,
            codec_incompatible: false,
            container_incompatible: false,
        }
    }

    /// Lightweight identity key: `path | size | mtime`.
    ///
    /// Preferred over a content hash during scanning for speed.
    pub fn identity_key(&self) -> String {
        let mtime = self
            .modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("{}|{}|{}", self.path.display(), self.size, mtime)
    }

    /// Whether a sibling QuickTime file with the same stem exists, which
    /// marks a HEIF/HEIC Live Photo pair.
    pub fn has_live_photo_sibling(&self) -> bool {
        if !matches!(self.extension.as_str(), ".heic" | ".heif") {
            return false;
        }
        let stem = match self.path.file_stem() {
            Some(stem) => stem.to_os_string(),
            None => return false,
        };
        let dir = match self.path.parent() {
            Some(dir) => dir,
            None => return false,
        };
        for ext in ["MOV", "mov"] {
            let mut sibling = stem.clone();
            sibling.push(".");
            sibling.push(ext);
            if dir.join(&sibling).is_file() {
                return true;
            }
        }
        false
    }
}

/// Probe-derived description of one [`MediaFile`].
///
/// The cheap scan fills the mandatory fields from the extension alone; the
/// optional fields are populated only by a deep probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container name (e.g. "png", "mov,mp4,m4a,3gp,3g2,mj2").
    pub container: String,
    /// Primary codec name (e.g. "h264", "vp9", "mjpeg").
    pub codec: String,
    /// Frame count; 1 for stills, a probe value or a fixed guess otherwise.
    pub frame_count: u64,
    /// Whether the file holds more than one presented frame.
    pub animated: bool,
    /// Integer quality estimate in 1..=100.
    pub quality_estimate: u8,
    /// `path | size | mtime` identity key of the described file.
    pub identity_key: String,
    /// Suspicion score in 0..=100, a routing hint for the deep probe.
    pub suspicion_score: u8,
    /// Reasons contributing to the suspicion score.
    pub suspicion_reasons: Vec<String>,
    /// Pixel width; deep probe only.
    pub width: Option<u32>,
    /// Pixel height; deep probe only.
    pub height: Option<u32>,
    /// Duration in seconds; deep probe only.
    pub duration_secs: Option<f64>,
    /// Bitrate in bits per second; deep probe only.
    pub bitrate: Option<u64>,
    /// Frame rate; deep probe only.
    pub frame_rate: Option<f64>,
    /// Pixel format (e.g. "yuv420p", "yuv444p"); deep probe only.
    pub pixel_format: Option<String>,
    /// Color space; deep probe only.
    pub color_space: Option<String>,
    /// Whether an audio stream is present; deep probe only.
    pub has_audio: Option<bool>,
}

impl MediaInfo {
    /// Megapixels from the probed dimensions, if available.
    pub fn megapixels(&self) -> Option<f64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w as f64 * h as f64 / 1_000_000.0),
            _ => None,
        }
    }
}

/// Outcome of one conversion operation.
///
/// One per completed task; accumulated into run-wide statistics by the
/// reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// The originating input path.
    pub input_path: PathBuf,
    /// Final output path; equals the input path for in-place skips.
    pub output_path: PathBuf,
    /// Size of the input in bytes.
    pub original_size: u64,
    /// Size of the final artifact in bytes.
    pub final_size: u64,
    /// `1 - final/original`; zero when skipped.
    pub compression_ratio: f64,
    /// Whether the operation produced and installed an artifact.
    pub success: bool,
    /// Whether the file was skipped rather than converted.
    pub skipped: bool,
    /// Reason for the skip, when `skipped` is set.
    pub skip_reason: Option<String>,
    /// Method tag (e.g. "jxl-lossless", "avif-q60", "mov-repackage").
    pub method: String,
    /// Wall-clock duration of the operation.
    pub duration: Duration,
    /// Error text for failed operations.
    pub error: Option<String>,
}

impl ConversionResult {
    /// Build a skipped result for `path` with the given reason.
    pub fn skipped(path: &Path, size: u64, reason: impl Into<String>) -> Self {
        Self {
            input_path: path.to_path_buf(),
            output_path: path.to_path_buf(),
            original_size: size,
            final_size: size,
            compression_ratio: 0.0,
            success: true,
            skipped: true,
            skip_reason: Some(reason.into()),
            method: "skip".to_string(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// Build a failed result for `path` with the given error text.
    pub fn failed(path: &Path, size: u64, method: &str, error: impl Into<String>) -> Self {
        Self {
            input_path: path.to_path_buf(),
            output_path: path.to_path_buf(),
            original_size: size,
            final_size: 0,
            compression_ratio: 0.0,
            success: false,
            skipped: false,
            skip_reason: None,
            method: method.to_string(),
            duration: Duration::ZERO,
            error: Some(error.into()),
        }
    }

    /// Build a successful result and derive the compression ratio.
    pub fn completed(
        input: &Path,
        output: &Path,
        original_size: u64,
        final_size: u64,
        method: &str,
        duration: Duration,
    ) -> Self {
        let compression_ratio = if original_size > 0 {
            1.0 - final_size as f64 / original_size as f64
        } else {
            0.0
        };
        Self {
            input_path: input.to_path_buf(),
            output_path: output.to_path_buf(),
            original_size,
            final_size,
            compression_ratio,
            success: true,
            skipped: false,
            skip_reason: None,
            method: method.to_string(),
            duration,
            error: None,
        }
    }
}
