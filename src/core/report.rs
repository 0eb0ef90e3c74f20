//! Run statistics and report generation.
//!
//! The reporter aggregates [`ConversionResult`]s into run-wide statistics
//! and writes detailed JSON and text reports. Per-file failures surface
//! here; they never affect the process exit code.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::media::ConversionResult;
use crate::core::strategy::Mode;
use crate::error::PixlyError;

/// The text report details at most this many failed files.
const MAX_FAILURES_DETAILED: usize = 50;

/// One failure entry in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Input path.
    pub path: PathBuf,
    /// Method tag of the failed operation.
    pub method: String,
    /// Captured error text.
    pub error: String,
}

/// Aggregated statistics for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Session id the stats belong to.
    pub session_id: String,
    /// Run mode.
    pub mode: Mode,
    /// Scanned directory.
    pub target_dir: PathBuf,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end; filled by `finish`.
    pub finished_at: Option<DateTime<Utc>>,
    /// Every file admitted to the run.
    pub total_files: u64,
    /// Successfully converted files.
    pub completed: u64,
    /// Skipped files.
    pub skipped: u64,
    /// Failed (or canceled) files.
    pub failed: u64,
    /// Input bytes of converted files.
    pub bytes_before: u64,
    /// Output bytes of converted files.
    pub bytes_after: u64,
    /// Skip reasons with occurrence counts.
    pub skip_reasons: BTreeMap<String, u64>,
    /// Method tags with occurrence counts.
    pub methods: BTreeMap<String, u64>,
    /// Failure details.
    pub failures: Vec<FailureDetail>,
}

impl RunStats {
    /// Start collecting for a session.
    pub fn new(session_id: String, mode: Mode, target_dir: PathBuf) -> Self {
        Self {
            session_id,
            mode,
            target_dir,
            started_at: Utc::now(),
            finished_at: None,
            total_files: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            bytes_before: 0,
            bytes_after: 0,
            skip_reasons: BTreeMap::new(),
            methods: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// Fold one result into the totals.
    pub fn record(&mut self, result: &ConversionResult) {
        self.total_files += 1;
        if result.skipped {
            self.skipped += 1;
            let reason = result
                .skip_reason
                .clone()
                .unwrap_or_else(|| "unspecified".to_string());
            *self.skip_reasons.entry(reason).or_insert(0) += 1;
        } else if result.success {
            self.completed += 1;
            self.bytes_before += result.original_size;
            self.bytes_after += result.final_size;
            *self.methods.entry(result.method.clone()).or_insert(0) += 1;
        } else {
            self.failed += 1;
            self.failures.push(FailureDetail {
                path: result.input_path.clone(),
                method: result.method.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
    }

    /// Stamp the end of the run.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Net bytes saved by completed conversions.
    pub fn bytes_saved(&self) -> i64 {
        self.bytes_before as i64 - self.bytes_after as i64
    }

    /// Overall reduction ratio across completed conversions.
    pub fn overall_reduction(&self) -> f64 {
        if self.bytes_before == 0 {
            return 0.0;
        }
        1.0 - self.bytes_after as f64 / self.bytes_before as f64
    }
}

/// Summary of an analysis-only run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Scanned directory.
    pub target_dir: PathBuf,
    /// Mode the analysis assumed.
    pub mode: Mode,
    /// Regular files visited.
    pub visited: u64,
    /// Files that would enter the pipeline.
    pub candidates: u64,
    /// Files resolved during the scan (already target, live photos).
    pub pre_skipped: u64,
    /// Candidates routed to the deep probe.
    pub probe_queue: u64,
    /// Candidates per extension.
    pub extensions: BTreeMap<String, u64>,
    /// Candidates per projected operation tag.
    pub projected_operations: BTreeMap<String, u64>,
}

/// Writes reports under `./reports/`.
pub struct Reporter {
    base_dir: PathBuf,
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("reports"),
        }
    }
}

impl Reporter {
    /// A reporter rooted somewhere else (tests).
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Write the JSON and text detailed reports for a finished run.
    pub fn write_conversion_reports(&self, stats: &RunStats) -> Result<(PathBuf, PathBuf)> {
        let dir = self.base_dir.join("conversion");
        fs::create_dir_all(&dir)
            .map_err(|e| PixlyError::file_operation("report-mkdir", e.to_string()))?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");

        let json_path = dir.join(format!("pixly_detailed_report_{stamp}.json"));
        let json = serde_json::to_string_pretty(stats)
            .map_err(|e| PixlyError::file_operation("report-json", e.to_string()))?;
        fs::write(&json_path, json)
            .map_err(|e| PixlyError::file_operation("report-write", e.to_string()))?;

        let txt_path = dir.join(format!("pixly_detailed_report_{stamp}.txt"));
        fs::write(&txt_path, render_text(stats))
            .map_err(|e| PixlyError::file_operation("report-write", e.to_string()))?;

        info!(
            "reports written: {} and {}",
            json_path.display(),
            txt_path.display()
        );
        Ok((json_path, txt_path))
    }

    /// Write the analysis report for a scan-only run.
    pub fn write_analysis_report(&self, summary: &AnalysisSummary) -> Result<PathBuf> {
        let dir = self.base_dir.join("analysis");
        fs::create_dir_all(&dir)
            .map_err(|e| PixlyError::file_operation("report-mkdir", e.to_string()))?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("pixly_analysis_{stamp}.json"));
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| PixlyError::file_operation("report-json", e.to_string()))?;
        fs::write(&path, json)
            .map_err(|e| PixlyError::file_operation("report-write", e.to_string()))?;
        Ok(path)
    }
}

/// Render the human-readable report body.
fn render_text(stats: &RunStats) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Pixly conversion report");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out, "session:   {}", stats.session_id);
    let _ = writeln!(out, "mode:      {}", stats.mode);
    let _ = writeln!(out, "target:    {}", stats.target_dir.display());
    let _ = writeln!(out, "started:   {}", stats.started_at.to_rfc3339());
    if let Some(finished) = stats.finished_at {
        let _ = writeln!(out, "finished:  {}", finished.to_rfc3339());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "files:     {}", stats.total_files);
    let _ = writeln!(out, "completed: {}", stats.completed);
    let _ = writeln!(out, "skipped:   {}", stats.skipped);
    let _ = writeln!(out, "failed:    {}", stats.failed);
    let _ = writeln!(
        out,
        "saved:     {} bytes ({:.1}% overall reduction)",
        stats.bytes_saved(),
        stats.overall_reduction() * 100.0
    );

    if !stats.methods.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "methods:");
        for (method, count) in &stats.methods {
            let _ = writeln!(out, "  {method:<20} {count}");
        }
    }
    if !stats.skip_reasons.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "skip reasons:");
        for (reason, count) in &stats.skip_reasons {
            let _ = writeln!(out, "  {reason:<40} {count}");
        }
    }
    if !stats.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "failures (first {} of {}):",
            stats.failures.len().min(MAX_FAILURES_DETAILED),
            stats.failures.len()
        );
        for failure in stats.failures.iter().take(MAX_FAILURES_DETAILED) {
            let _ = writeln!(
                out,
                "  {} [{}]: {}",
                failure.path.display(),
                failure.method,
                failure.error
            );
        }
    }
    out
}
