//! Directory scanning and the cheap half of the two-phase classifier.
//!
//! The scanner performs a single walk of the target tree. For every regular
//! file that survives the extension filter it produces an owned
//! [`MediaFile`] plus an initial [`MediaInfo`] carrying a suspicion score.
//! Files whose effective extension already matches the active mode's target
//! format short-circuit to a skipped result and never enter the work pool.
//!
//! The expensive half of classification (the deep probe) lives in
//! [`crate::core::classifier`].

pub mod magic;
pub mod suspicion;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use log::{debug, trace, warn};
use walkdir::WalkDir;

use crate::Result;
use crate::core::media::{
    ANIMATED_EXTENSIONS, ConversionResult, MediaFile, MediaInfo, MediaKind,
};
use crate::core::strategy::Mode;
use magic::{MAGIC_HEADER_LEN, detect_container};
use suspicion::LARGE_FILE_BYTES;

/// Output subtrees that must never be scanned.
const DENYLISTED_DIRS: &[&str] = &[
    "backups",
    "results",
    "logs",
    "reports",
    ".trash",
    "pixly_checkpoints",
];

/// One scanned candidate: the file, its initial probe-less info, and the
/// routing decision for the deep probe.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Owned identity of the input.
    pub file: MediaFile,
    /// Extension-derived info with the suspicion score filled in.
    pub info: MediaInfo,
    /// Whether the suspicion score reached the deep-probe threshold.
    pub needs_probe: bool,
}

/// Result of one tree walk.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Files that continue into classification and the strategy engine.
    pub candidates: Vec<ScannedFile>,
    /// Files resolved during the scan itself (already target, live photos).
    pub skipped: Vec<ConversionResult>,
    /// Total regular files visited, recognized or not.
    pub visited: u64,
}

/// Tree scanner with the cheap metadata pass.
///
/// Results are appended under the write half of a single read-write lock;
/// the lock is never held across file I/O on an individual entry.
pub struct Scanner {
    root: PathBuf,
    mode: Mode,
    probe_threshold: u8,
    buffers: std::sync::Arc<crate::core::arena::BufferPool>,
    outcome: RwLock<ScanOutcome>,
}

impl Scanner {
    /// Create a scanner for `root` under the given mode.
    pub fn new(root: impl Into<PathBuf>, mode: Mode, probe_threshold: u8) -> Self {
        Self {
            root: root.into(),
            mode,
            probe_threshold,
            buffers: std::sync::Arc::new(crate::core::arena::BufferPool::default()),
            outcome: RwLock::new(ScanOutcome::default()),
        }
    }

    /// Share the run's buffer pool instead of an internal one.
    pub fn with_buffers(
        mut self,
        buffers: std::sync::Arc<crate::core::arena::BufferPool>,
    ) -> Self {
        self.buffers = buffers;
        self
    }

    /// Walk the tree and classify every regular file cheaply.
    ///
    /// This is a blocking metadata pass; callers on the async runtime wrap
    /// it in `spawn_blocking`.
    pub fn scan(self) -> Result<ScanOutcome> {
        if !self.root.is_dir() {
            return Err(crate::error::PixlyError::DirectoryReadError {
                path: self.root.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "target is not a readable directory",
                ),
            });
        }

        let now = SystemTime::now();
        // Depth 0 is the target root itself; only subdirectories are
        // subject to the hidden/denylist filter.
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !is_denied_dir(entry.path(), entry.file_type().is_dir())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("scan: skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("scan: cannot stat {}: {}", entry.path().display(), err);
                    continue;
                }
            };

            {
                let mut outcome = self.outcome.write().unwrap();
                outcome.visited += 1;
            }

            let file = MediaFile::from_metadata(entry.path().to_path_buf(), &metadata);
            if let Some(scanned) = self.evaluate(file, now) {
                let mut outcome = self.outcome.write().unwrap();
                match scanned {
                    Evaluated::Candidate(candidate) => outcome.candidates.push(candidate),
                    Evaluated::Skipped(result) => outcome.skipped.push(result),
                }
            }
        }

        Ok(self.outcome.into_inner().unwrap())
    }

    /// Apply the cheap filter, the conditional magic check, the
    /// target-format short-circuit, and suspicion scoring to one file.
    fn evaluate(&self, mut file: MediaFile, now: SystemTime) -> Option<Evaluated> {
        let needs_magic =
            file.kind == MediaKind::Unknown || file.size == 0 || file.size > LARGE_FILE_BYTES;

        let mut magic_mismatch = false;
        let mut container_name = None;
        if needs_magic {
            match self.read_magic(&file.path) {
                Ok(header) => {
                    if let Some(detected) = detect_container(&header) {
                        container_name = Some(detected.name);
                        if detected.extension != file.extension {
                            trace!(
                                "magic correction: {} {} -> {}",
                                file.path.display(),
                                if file.extension.is_empty() {
                                    "(none)"
                                } else {
                                    &file.extension
                                },
                                detected.extension
                            );
                            if !file.extension.is_empty() {
                                magic_mismatch = true;
                            }
                            // Store the corrected extension and re-evaluate.
                            file.extension = detected.extension.to_string();
                            file.kind = MediaKind::from_extension(&file.extension);
                        }
                    }
                }
                Err(err) => {
                    debug!("magic read failed for {}: {}", file.path.display(), err);
                }
            }
        }

        // Not media at all; drop silently.
        if file.kind == MediaKind::Unknown && file.size > 0 {
            return None;
        }

        // Hard contract: files already in the target set are never probed
        // further and never re-encoded.
        if self.mode.is_target_extension(&file.extension) {
            return Some(Evaluated::Skipped(ConversionResult::skipped(
                &file.path,
                file.size,
                "already target format",
            )));
        }

        if file.has_live_photo_sibling() {
            return Some(Evaluated::Skipped(ConversionResult::skipped(
                &file.path,
                file.size,
                "live photo",
            )));
        }

        let suspicion = suspicion::score(&file, magic_mismatch, now);
        let needs_probe = suspicion.score >= self.probe_threshold;

        let info = initial_info(&file, container_name, suspicion);
        Some(Evaluated::Candidate(ScannedFile {
            file,
            info,
            needs_probe,
        }))
    }

    /// Read up to the magic header length from the start of a file,
    /// through the run's reusable buffer pool.
    fn read_magic(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut buffer = self.buffers.get();
        buffer.resize(MAGIC_HEADER_LEN, 0);

        let mut file = File::open(path)?;
        let mut filled = 0;
        while filled < buffer.len() {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let header = buffer[..filled].to_vec();
        self.buffers.put(buffer);
        Ok(header)
    }
}

enum Evaluated {
    Candidate(ScannedFile),
    Skipped(ConversionResult),
}

/// Whether a directory is hidden or denylisted.
fn is_denied_dir(path: &Path, is_dir: bool) -> bool {
    if !is_dir {
        return false;
    }
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return false,
    };
    (name.starts_with('.') && name.len() > 1) || DENYLISTED_DIRS.contains(&name.as_ref())
}

/// Build the extension-trusted [`MediaInfo`] for a scanned file.
fn initial_info(
    file: &MediaFile,
    container: Option<&'static str>,
    suspicion: suspicion::SuspicionScore,
) -> MediaInfo {
    let animated = ANIMATED_EXTENSIONS.contains(&file.extension.as_str());
    MediaInfo {
        container: container
            .map(str::to_string)
            .unwrap_or_else(|| file.extension.trim_start_matches('.').to_string()),
        codec: default_codec_guess(&file.extension).to_string(),
        frame_count: if animated { 10 } else { 1 },
        animated,
        quality_estimate: 0,
        identity_key: file.identity_key(),
        suspicion_score: suspicion.score,
        suspicion_reasons: suspicion.reasons,
        ..MediaInfo::default()
    }
}

/// Default codec guess for trusted extensions.
fn default_codec_guess(extension: &str) -> &'static str {
    match extension {
        ".jpg" | ".jpeg" => "mjpeg",
        ".png" => "png",
        ".gif" => "gif",
        ".webp" => "webp",
        ".bmp" => "bmp",
        ".tif" | ".tiff" => "tiff",
        ".heic" | ".heif" => "hevc",
        ".avif" => "av1",
        ".jxl" => "jpegxl",
        ".mp4" | ".m4v" | ".mov" | ".3gp" => "h264",
        ".mkv" | ".webm" => "vp9",
        ".avi" => "mpeg4",
        ".flv" => "flv1",
        ".wmv" => "wmv2",
        ".mpg" | ".mpeg" | ".ts" => "mpeg2video",
        _ => "unknown",
    }
}
