// src/config/mod.rs
//! Configuration types for the Pixly engine.
//!
//! The core never parses configuration files; an external collaborator (the
//! CLI layer, or an embedding application) constructs a [`Config`] and hands
//! it to [`crate::core::pipeline::RunContext`]. This module only defines the
//! option structs, their defaults, and section validation.
//!
//! # Key Components
//!
//! - [`Config`] - Main configuration structure containing all settings
//! - [`validator`] - Section validators invoked before a run starts
//!
//! # Examples
//!
//! ```rust
//! use pixly::config::Config;
//! use pixly::core::strategy::Mode;
//!
//! let mut config = Config::default();
//! config.mode = Mode::AutoPlus;
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;
use crate::core::strategy::Mode;

pub mod validator;

// ============================================================================
// Configuration Type Definitions
// ============================================================================

/// Full engine configuration for Pixly.
///
/// This struct aggregates all settings for conversion mode, output layout,
/// concurrency limits, path security, problem-file handling, external tool
/// paths, watchdog timing, and tunable strategy thresholds.
///
/// # Examples
///
/// ```rust
/// use pixly::config::Config;
///
/// let config = Config::default();
/// assert!(config.output.directory_template.is_none());
/// assert_eq!(config.watchdog.per_file_timeout_secs, 120);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Conversion mode driving the strategy engine.
    pub mode: Mode,
    /// Output layout settings (in-place vs. mirror tree).
    pub output: OutputConfig,
    /// Worker counts and memory ceiling.
    pub concurrency: ConcurrencyConfig,
    /// Path whitelist/denylist for argument normalization.
    pub security: SecurityConfig,
    /// Corrupted-file policy.
    pub problem_files: ProblemFileConfig,
    /// Paths to the external codec and introspection binaries.
    pub tools: ToolsConfig,
    /// Stagnation and per-file timeout settings.
    pub watchdog: WatchdogConfig,
    /// Tunable strategy thresholds and quality ladders.
    pub tuning: TuningConfig,
}

/// Output layout settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OutputConfig {
    /// Empty means in-place replacement; otherwise the root of a mirrored
    /// output tree: `<template>/<rel>/file.<newext>`.
    pub directory_template: Option<PathBuf>,
    /// If true, the original file survives an in-place conversion.
    pub keep_original: bool,
}

/// Worker counts and memory ceiling consumed by the pool and the governor.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConcurrencyConfig {
    /// Initial worker count; `0` selects the CPU count.
    pub conversion_workers: usize,
    /// Memory ceiling in MiB for the resource governor.
    pub memory_limit_mb: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            conversion_workers: 0,
            memory_limit_mb: 4096,
        }
    }
}

/// Path whitelist and denylist enforced during argument normalization.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SecurityConfig {
    /// Directories a normalized path argument must fall under. Empty means
    /// only the run's target directory is allowed.
    pub allowed_directories: Vec<PathBuf>,
    /// Directories that are always rejected.
    pub forbidden_directories: Vec<PathBuf>,
}

/// What to do with files the classifier marks as corrupted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorruptedFileStrategy {
    /// Delete the corrupted file.
    Delete,
    /// Atomically rename the file into a sibling `.trash/` directory.
    MoveToTrash,
    /// Leave the file untouched.
    #[default]
    Ignore,
    /// Ask interactively; a 5 s timeout defaults to ignore.
    Prompt,
}

impl std::str::FromStr for CorruptedFileStrategy {
    type Err = crate::error::PixlyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delete" => Ok(Self::Delete),
            "move_to_trash" | "move-to-trash" => Ok(Self::MoveToTrash),
            "ignore" => Ok(Self::Ignore),
            "prompt" => Ok(Self::Prompt),
            other => Err(crate::error::PixlyError::config(format!(
                "unknown corrupted file strategy: {}",
                other
            ))),
        }
    }
}

/// Problem-file handling settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProblemFileConfig {
    /// Strategy applied to corrupted files after classification.
    pub corrupted_file_strategy: CorruptedFileStrategy,
}

/// Paths to the external binaries. `None` means resolve from PATH.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    /// Media introspection tool (ffprobe-compatible JSON output).
    pub ffprobe_path: Option<PathBuf>,
    /// JPEG XL encoder.
    pub cjxl_path: Option<PathBuf>,
    /// AVIF encoder.
    pub avifenc_path: Option<PathBuf>,
    /// Media processor for container repackage and pre-decoding.
    pub ffmpeg_path: Option<PathBuf>,
    /// Metadata tag-copy tool; optional, timestamps-only fallback applies.
    pub exiftool_path: Option<PathBuf>,
}

/// Watchdog timing settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchdogConfig {
    /// Stagnation timeout for normal files, in seconds.
    pub stagnant_timeout_secs: u64,
    /// Stagnation timeout for large files, in seconds.
    pub large_file_stagnant_timeout_secs: u64,
    /// Size above which a file uses the large-file stagnation timeout.
    pub large_file_threshold_bytes: u64,
    /// Hard per-file processing budget, in seconds.
    pub per_file_timeout_secs: u64,
    /// Interval between memory-pressure samples, in seconds.
    pub memory_check_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stagnant_timeout_secs: 60,
            large_file_stagnant_timeout_secs: 180,
            large_file_threshold_bytes: 50 * 1024 * 1024,
            per_file_timeout_secs: 120,
            memory_check_interval_secs: 30,
        }
    }
}

/// Tunable strategy thresholds.
///
/// The published defaults come from the reference behavior; they are
/// defaults, not invariants.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TuningConfig {
    /// Suspicion score at or above which a file gets a deep probe.
    pub suspicion_probe_threshold: u8,
    /// Emoji-mode acceptance band for the size reduction ratio.
    pub emoji_accept_band: (f64, f64),
    /// Emoji-mode descending quality ladder.
    pub emoji_quality_ladder: Vec<u8>,
    /// Lossy probe qualities for high-quality inputs in auto+ mode.
    pub lossy_ladder_high: Vec<u8>,
    /// Lossy probe qualities for everything else in auto+ mode.
    pub lossy_ladder_default: Vec<u8>,
    /// A lossy result must save at least this many bytes.
    pub min_saving_bytes: u64,
    /// A lossy result must save at least this fraction of the original.
    pub min_saving_ratio: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            suspicion_probe_threshold: 50,
            emoji_accept_band: (0.07, 0.13),
            emoji_quality_ladder: vec![60, 50, 40, 30, 25, 20],
            lossy_ladder_high: vec![90, 85, 75],
            lossy_ladder_default: vec![60, 55],
            min_saving_bytes: 1024,
            min_saving_ratio: 0.05,
        }
    }
}

impl Config {
    /// Validate every section of this configuration.
    ///
    /// Called once before a run starts; a failure here is process-fatal.
    pub fn validate(&self) -> Result<()> {
        validator::validate_concurrency(&self.concurrency)?;
        validator::validate_output(&self.output)?;
        validator::validate_watchdog(&self.watchdog)?;
        validator::validate_tuning(&self.tuning)?;
        Ok(())
    }
}
