//! Worker-side execution of strategy operations.
//!
//! The executor dispatches on the [`Operation`] variant, drives the
//! encoders, evaluates acceptance rules, and hands every accepted artifact
//! to the atomic replacer. Per-task cancellation, progress reporting, and
//! temp cleanup all live here; the pool knows nothing about encoding.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::Config;
use crate::core::media::{ConversionResult, MediaFile};
use crate::core::pool::{Task, TaskExecutor};
use crate::core::replace::{self, Replacer};
use crate::core::strategy::{
    Acceptance, Effort, LosslessPlan, LossyPlan, Operation, PreProcessor, RepackagePlan,
    TargetFormat, meets_saving_floors, reduction_ratio, select_scored_probe,
};
use crate::core::watchdog::Watchdog;
use crate::error::PixlyError;
use crate::services::encoders::Encoders;

/// One lossy probe outcome awaiting acceptance.
#[derive(Debug, Clone)]
struct ProbeOutcome {
    quality: u8,
    temp: PathBuf,
    size: u64,
}

/// Executes operations chosen by the strategy engine.
pub struct ConversionExecutor {
    encoders: Arc<Encoders>,
    replacer: Arc<Replacer>,
    watchdog: Arc<Watchdog>,
    target_dir: PathBuf,
    output_template: Option<PathBuf>,
}

impl ConversionExecutor {
    /// Wire an executor for one run.
    pub fn new(
        encoders: Arc<Encoders>,
        replacer: Arc<Replacer>,
        watchdog: Arc<Watchdog>,
        target_dir: PathBuf,
        config: &Config,
    ) -> Self {
        Self {
            encoders,
            replacer,
            watchdog,
            target_dir,
            output_template: config.output.directory_template.clone(),
        }
    }

    /// Resolve the final output path for a file and target extension.
    ///
    /// In-place mode keeps the file's directory; tree-mirror mode rebuilds
    /// the relative path under the template root.
    pub fn output_path(&self, file: &MediaFile, extension: &str) -> PathBuf {
        let stem = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.base_name.clone());
        let name = format!("{stem}{extension}");
        match &self.output_template {
            None => file.path.with_file_name(name),
            Some(template) => {
                let rel = file
                    .path
                    .parent()
                    .and_then(|p| p.strip_prefix(&self.target_dir).ok())
                    .unwrap_or_else(|| Path::new(""));
                template.join(rel).join(name)
            }
        }
    }

    async fn run_operation(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        progress: &crate::core::watchdog::ProgressHandle,
    ) -> Result<ConversionResult> {
        let file = &task.file;
        let started = Instant::now();

        // Idempotence: when an earlier run already produced the artifact
        // (keep-original or mirror mode), never re-encode it.
        if let Some(existing) = self.existing_output(file, &task.operation) {
            debug!(
                "skipping {}: output {} already exists",
                file.path.display(),
                existing.display()
            );
            return Ok(ConversionResult::skipped(
                &file.path,
                file.size,
                "output already exists",
            ));
        }

        match &task.operation {
            Operation::Skip { reason } => {
                Ok(ConversionResult::skipped(&file.path, file.size, reason.clone()))
            }
            Operation::RepackageVideo => {
                let target = self.prepare_target(file, TargetFormat::Mov.extension())?;
                let temp = replace::temp_path(&target);
                self.encoders
                    .mov_repackage(&file.path, &temp, cancel)
                    .await
                    .inspect_err(|_| cleanup(&temp))?;
                progress.report(0.8);
                let size = self
                    .replacer
                    .install(&temp, &target, &file.path, cancel)
                    .await?;
                Ok(ConversionResult::completed(
                    &file.path,
                    &target,
                    file.size,
                    size,
                    "mov-repackage",
                    started.elapsed(),
                ))
            }
            Operation::Repackage(plan) => {
                self.run_repackage(file, plan, cancel, progress, started).await
            }
            Operation::LosslessReencode(plan) => {
                self.run_lossless(file, plan, cancel, progress, started).await
            }
            Operation::LossyProbe(plan) => {
                self.run_lossy(task, plan, cancel, progress, started).await
            }
        }
    }

    /// JPEG→JXL (or PNG→JXL) bit-preserving container change.
    async fn run_repackage(
        &self,
        file: &MediaFile,
        plan: &RepackagePlan,
        cancel: &CancellationToken,
        progress: &crate::core::watchdog::ProgressHandle,
        started: Instant,
    ) -> Result<ConversionResult> {
        let target = self.prepare_target(file, TargetFormat::Jxl.extension())?;
        let temp = replace::temp_path(&target);
        let effort = Effort::High;
        let encode = if plan.jpeg_recompression {
            self.encoders
                .jxl_from_jpeg(&file.path, &temp, effort, cancel)
                .await
        } else {
            self.encoders
                .jxl_lossless(&file.path, &temp, effort, cancel)
                .await
        };
        encode.inspect_err(|_| cleanup(&temp))?;
        progress.report(0.7);

        if let Some((min_bytes, min_ratio)) = plan.floors {
            let temp_size = file_size(&temp)?;
            if !meets_saving_floors(file.size, temp_size, min_bytes, min_ratio) {
                cleanup(&temp);
                return Ok(ConversionResult::skipped(
                    &file.path,
                    file.size,
                    "no significant size reduction",
                ));
            }
        }

        let size = self
            .replacer
            .install(&temp, &target, &file.path, cancel)
            .await?;
        Ok(ConversionResult::completed(
            &file.path,
            &target,
            file.size,
            size,
            "jxl-repackage",
            started.elapsed(),
        ))
    }

    /// Mathematically lossless re-encode into JXL or AVIF.
    async fn run_lossless(
        &self,
        file: &MediaFile,
        plan: &LosslessPlan,
        cancel: &CancellationToken,
        progress: &crate::core::watchdog::ProgressHandle,
        started: Instant,
    ) -> Result<ConversionResult> {
        let target = self.prepare_target(file, plan.target.extension())?;
        let temp = replace::temp_path(&target);

        let (source, predecoded) = self.pre_process(file, plan.pre, cancel).await?;
        progress.report(0.3);

        let encode = match plan.target {
            TargetFormat::Jxl => {
                self.encoders
                    .jxl_lossless(&source, &temp, plan.effort, cancel)
                    .await
            }
            // The lossless AVIF route only carries animations; stills go
            // through JXL or the emoji/balanced ladders.
            TargetFormat::Avif => {
                self.encoders.avif_animated(&source, &temp, None, cancel).await
            }
            TargetFormat::Mov => Err(PixlyError::conversion(
                &file.path,
                "lossless re-encode cannot target a video container",
            )),
        };
        if let Some(link) = predecoded {
            cleanup(&link);
        }
        encode.inspect_err(|_| cleanup(&temp))?;
        progress.report(0.8);

        let size = self
            .replacer
            .install(&temp, &target, &file.path, cancel)
            .await?;
        let method = match plan.target {
            TargetFormat::Jxl => "jxl-lossless",
            TargetFormat::Avif => "avif-lossless",
            TargetFormat::Mov => unreachable!("rejected above"),
        };
        Ok(ConversionResult::completed(
            &file.path,
            &target,
            file.size,
            size,
            method,
            started.elapsed(),
        ))
    }

    /// Lossy probing: the emoji band ladder or the balanced scored ladder.
    async fn run_lossy(
        &self,
        task: &Task,
        plan: &LossyPlan,
        cancel: &CancellationToken,
        progress: &crate::core::watchdog::ProgressHandle,
        started: Instant,
    ) -> Result<ConversionResult> {
        let file = &task.file;
        match &plan.acceptance {
            Acceptance::Band { low, high } => {
                self.run_banded(task, plan, (*low, *high), cancel, progress, started)
                    .await
            }
            Acceptance::Scored {
                min_saving_bytes,
                min_saving_ratio,
            } => {
                self.run_scored(
                    file,
                    plan,
                    (*min_saving_bytes, *min_saving_ratio),
                    cancel,
                    progress,
                    started,
                )
                .await
            }
        }
    }

    /// Emoji acceptance: lossless first, then the descending ladder; the
    /// first result inside the band wins, and a reduction above the band at
    /// the ladder's first quality also wins.
    async fn run_banded(
        &self,
        task: &Task,
        plan: &LossyPlan,
        band: (f64, f64),
        cancel: &CancellationToken,
        progress: &crate::core::watchdog::ProgressHandle,
        started: Instant,
    ) -> Result<ConversionResult> {
        let file = &task.file;
        let (low, high) = band;
        let target = self.prepare_target(file, plan.target.extension())?;
        let (source, predecoded) = self.pre_process(file, plan.pre, cancel).await?;
        let animated = task.info.animated;

        let total_steps = plan.qualities.len() as f64 + 1.0;
        let mut step = 0.0;

        let outcome: Result<Option<(PathBuf, u64, String)>> = async {
            if plan.try_lossless_first {
                let temp = replace::temp_path(&target);
                let encode = if animated {
                    self.encoders.avif_animated(&source, &temp, None, cancel).await
                } else {
                    self.encoders.avif_lossless_still(&source, &temp, cancel).await
                };
                step += 1.0;
                progress.report(step / total_steps);
                match encode {
                    Ok(()) => {
                        let size = file_size(&temp)?;
                        let reduction = reduction_ratio(file.size, size);
                        if reduction >= low && reduction <= high {
                            return Ok(Some((temp, size, "avif-lossless".to_string())));
                        }
                        cleanup(&temp);
                    }
                    Err(err) if !err.is_transient() => return Err(err),
                    Err(err) => {
                        debug!("emoji lossless attempt failed for {}: {}", file.path.display(), err);
                    }
                }
            }

            for (index, quality) in plan.qualities.iter().enumerate() {
                if cancel.is_cancelled() {
                    return Err(PixlyError::Cancelled);
                }
                let temp = replace::probe_temp_path(&target, *quality);
                let encode = if animated {
                    self.encoders
                        .avif_animated(&source, &temp, Some(*quality), cancel)
                        .await
                } else {
                    self.encoders
                        .avif_quality_still(&source, &temp, *quality, cancel)
                        .await
                };
                step += 1.0;
                progress.report(step / total_steps);
                match encode {
                    Ok(()) => {
                        let size = file_size(&temp)?;
                        let reduction = reduction_ratio(file.size, size);
                        let in_band = reduction >= low && reduction <= high;
                        let above_at_first = index == 0 && reduction > high;
                        if in_band || above_at_first {
                            return Ok(Some((temp, size, format!("avif-q{quality}"))));
                        }
                        cleanup(&temp);
                    }
                    Err(err) if !err.is_transient() => return Err(err),
                    Err(err) => {
                        debug!("emoji q{} failed for {}: {}", quality, file.path.display(), err);
                    }
                }
            }
            Ok(None)
        }
        .await;

        if let Some(link) = predecoded {
            cleanup(&link);
        }
        match outcome? {
            Some((temp, _size, method)) => {
                let size = self
                    .replacer
                    .install(&temp, &target, &file.path, cancel)
                    .await?;
                Ok(ConversionResult::completed(
                    &file.path,
                    &target,
                    file.size,
                    size,
                    &method,
                    started.elapsed(),
                ))
            }
            None => Ok(ConversionResult::skipped(
                &file.path,
                file.size,
                "no result in acceptance band",
            )),
        }
    }

    /// Balanced ladder: repackage, then mathematical lossless, then scored
    /// lossy probes. Every accepted result must clear the saving floors.
    async fn run_scored(
        &self,
        file: &MediaFile,
        plan: &LossyPlan,
        floors: (u64, f64),
        cancel: &CancellationToken,
        progress: &crate::core::watchdog::ProgressHandle,
        started: Instant,
    ) -> Result<ConversionResult> {
        let (min_bytes, min_ratio) = floors;
        let jxl_target = self.prepare_target(file, TargetFormat::Jxl.extension())?;

        // Step 1: bit-preserving repackage for JPEG and PNG inputs.
        if plan.repackage_first {
            let temp = replace::temp_path(&jxl_target);
            let is_jpeg = matches!(file.extension.as_str(), ".jpg" | ".jpeg");
            let encode = if is_jpeg {
                self.encoders
                    .jxl_from_jpeg(&file.path, &temp, Effort::High, cancel)
                    .await
            } else {
                self.encoders
                    .jxl_lossless(&file.path, &temp, Effort::High, cancel)
                    .await
            };
            progress.report(0.2);
            match encode {
                Ok(()) => {
                    let temp_size = file_size(&temp)?;
                    if meets_saving_floors(file.size, temp_size, min_bytes, min_ratio) {
                        let size = self
                            .replacer
                            .install(&temp, &jxl_target, &file.path, cancel)
                            .await?;
                        return Ok(ConversionResult::completed(
                            &file.path,
                            &jxl_target,
                            file.size,
                            size,
                            "jxl-repackage",
                            started.elapsed(),
                        ));
                    }
                    cleanup(&temp);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    debug!("balanced repackage failed for {}: {}", file.path.display(), err);
                }
            }
        } else {
            // Step 2: mathematical lossless when repackage is inapplicable.
            let (source, predecoded) = self.pre_process(file, plan.pre, cancel).await?;
            let temp = replace::temp_path(&jxl_target);
            let encode = self
                .encoders
                .jxl_lossless(&source, &temp, Effort::High, cancel)
                .await;
            if let Some(link) = &predecoded {
                cleanup(link);
            }
            progress.report(0.3);
            match encode {
                Ok(()) => {
                    let temp_size = file_size(&temp)?;
                    if meets_saving_floors(file.size, temp_size, min_bytes, min_ratio) {
                        let size = self
                            .replacer
                            .install(&temp, &jxl_target, &file.path, cancel)
                            .await?;
                        return Ok(ConversionResult::completed(
                            &file.path,
                            &jxl_target,
                            file.size,
                            size,
                            "jxl-lossless",
                            started.elapsed(),
                        ));
                    }
                    cleanup(&temp);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    debug!("balanced lossless failed for {}: {}", file.path.display(), err);
                }
            }
        }

        // Step 3: independent lossy probes, scored.
        let avif_target = self.prepare_target(file, plan.target.extension())?;
        let (source, predecoded) = self.pre_process(file, plan.pre, cancel).await?;
        let probes = self
            .run_probes(file, &source, &avif_target, &plan.qualities, cancel)
            .await;
        if let Some(link) = predecoded {
            cleanup(&link);
        }
        let probes = probes?;
        progress.report(0.9);

        let scored: Vec<(u8, u64)> = probes.iter().map(|p| (p.quality, p.size)).collect();
        let winner = select_scored_probe(&scored, file.size, min_bytes, min_ratio)
            .map(|index| &probes[index]);

        let result = match winner {
            Some(best) => {
                let size = self
                    .replacer
                    .install(&best.temp, &avif_target, &file.path, cancel)
                    .await?;
                Ok(ConversionResult::completed(
                    &file.path,
                    &avif_target,
                    file.size,
                    size,
                    &format!("avif-q{}", best.quality),
                    started.elapsed(),
                ))
            }
            None => Ok(ConversionResult::skipped(
                &file.path,
                file.size,
                "no significant size reduction",
            )),
        };
        // Losing probes are deleted; the winner was consumed by install.
        for probe in &probes {
            cleanup(&probe.temp);
        }
        result
    }

    /// Run every quality as an independent encode into a uniquely suffixed
    /// temp path. Each probe reads through its own hardlink of the input so
    /// concurrent encoders do not collide on the source.
    async fn run_probes(
        &self,
        file: &MediaFile,
        source: &Path,
        target: &Path,
        qualities: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<ProbeOutcome>> {
        let futures = qualities.iter().map(|quality| {
            let temp = replace::probe_temp_path(target, *quality);
            let link = probe_input_link(source, *quality);
            async move {
                if cancel.is_cancelled() {
                    return Err(PixlyError::Cancelled);
                }
                let probe_source = link.as_deref().unwrap_or(source);
                let encode = self
                    .encoders
                    .avif_quality_still(probe_source, &temp, *quality, cancel)
                    .await;
                if let Some(link) = &link {
                    cleanup(link);
                }
                match encode {
                    Ok(()) => {
                        let size = file_size(&temp)?;
                        Ok(Some(ProbeOutcome {
                            quality: *quality,
                            temp,
                            size,
                        }))
                    }
                    Err(err) if !err.is_transient() => Err(err),
                    Err(err) => {
                        warn!("probe q{} failed for {}: {}", quality, file.path.display(), err);
                        cleanup(&temp);
                        Ok(None)
                    }
                }
            }
        });
        let outcomes = futures::future::join_all(futures).await;
        let mut probes = Vec::new();
        for outcome in outcomes {
            if let Some(probe) = outcome? {
                probes.push(probe);
            }
        }
        Ok(probes)
    }

    /// Run the plan's pre-processor, returning the encode source and the
    /// temp to clean up afterwards.
    async fn pre_process(
        &self,
        file: &MediaFile,
        pre: Option<PreProcessor>,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, Option<PathBuf>)> {
        match pre {
            None => Ok((file.path.clone(), None)),
            Some(step) => {
                let mut name = file.path.as_os_str().to_os_string();
                name.push(".predecode.png");
                let temp = PathBuf::from(name);
                let run = match step {
                    PreProcessor::DecodeToPng => {
                        self.encoders.decode_to_png(&file.path, &temp, cancel).await
                    }
                    PreProcessor::ExtractFirstFrame => {
                        self.encoders
                            .extract_first_frame(&file.path, &temp, cancel)
                            .await
                    }
                };
                run.inspect_err(|_| cleanup(&temp))?;
                Ok((temp.clone(), Some(temp)))
            }
        }
    }

    /// Already-produced output for this operation, if any.
    fn existing_output(&self, file: &MediaFile, operation: &Operation) -> Option<PathBuf> {
        let mut extensions = Vec::new();
        match operation {
            Operation::Skip { .. } => return None,
            Operation::RepackageVideo => extensions.push(TargetFormat::Mov.extension()),
            Operation::Repackage(_) => extensions.push(TargetFormat::Jxl.extension()),
            Operation::LosslessReencode(plan) => extensions.push(plan.target.extension()),
            Operation::LossyProbe(plan) => {
                extensions.push(plan.target.extension());
                if plan.repackage_first {
                    extensions.push(TargetFormat::Jxl.extension());
                }
            }
        }
        extensions
            .into_iter()
            .map(|ext| self.output_path(file, ext))
            .find(|candidate| candidate != &file.path && candidate.exists())
    }

    /// Resolve the target path, check disk space, and create mirror dirs.
    fn prepare_target(&self, file: &MediaFile, extension: &str) -> Result<PathBuf> {
        let target = self.output_path(file, extension);
        if let Some(parent) = target.parent() {
            if self.output_template.is_some() {
                fs::create_dir_all(parent)
                    .map_err(|e| PixlyError::file_operation("mkdir", e.to_string()))?;
            }
            replace::check_disk_space(
                if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                },
                file.size,
            )?;
        }
        Ok(target)
    }
}

#[async_trait]
impl TaskExecutor for ConversionExecutor {
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> ConversionResult {
        let progress =
            self.watchdog
                .register(&task.id, task.file.path.clone(), task.file.size, cancel.clone());
        let outcome = self.run_operation(task, &cancel, &progress).await;
        progress.complete();
        match outcome {
            Ok(result) => result,
            Err(err) => ConversionResult::failed(
                &task.file.path,
                task.file.size,
                task.operation.method_tag(),
                err.to_string(),
            ),
        }
    }
}

/// Hardlink the input for one probe; falls back to no link when the
/// filesystem refuses (the caller then reads the original directly).
fn probe_input_link(source: &Path, quality: u8) -> Option<PathBuf> {
    let mut name = source.as_os_str().to_os_string();
    name.push(format!("._probe_in_q{quality}"));
    let link = PathBuf::from(name);
    match fs::hard_link(source, &link) {
        Ok(()) => Some(link),
        Err(_) => {
            #[cfg(unix)]
            {
                if std::os::unix::fs::symlink(source, &link).is_ok() {
                    return Some(link);
                }
            }
            None
        }
    }
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| PixlyError::file_operation("stat", format!("{}: {}", path.display(), e)))
}

fn cleanup(path: &Path) {
    let _ = fs::remove_file(path);
}
