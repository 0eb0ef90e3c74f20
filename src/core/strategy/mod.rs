//! Mode-driven conversion strategy.
//!
//! Each mode is a pure function `(MediaFile, MediaInfo) -> Operation`; the
//! returned [`Operation`] names a concrete encoding recipe for the worker to
//! execute. The strategy never touches files itself.
//!
//! Three modes exist:
//! - **Quality**: lossless, format-forcing (JXL stills, AVIF animations,
//!   QuickTime repackage for video).
//! - **Emoji**: aggressive size reduction into AVIF for stills and short
//!   animations; video is skipped outright.
//! - **Auto+**: adaptive, quality-aware routing between lossless paths and
//!   the balanced-optimization ladder.

pub mod auto_plus;
pub mod emoji;
pub mod quality;
pub mod quality_estimate;

use serde::{Deserialize, Serialize};

use crate::core::media::{MediaFile, MediaInfo};
use crate::core::watchdog::PressureLevel;

pub use quality_estimate::QualityClass;

/// Conversion mode selected for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Lossless, format-forcing.
    #[default]
    Quality,
    /// Adaptive, quality-aware.
    #[serde(rename = "auto+")]
    AutoPlus,
    /// Aggressive size reduction for stickers and short animations.
    Emoji,
}

impl Mode {
    /// Extensions that count as "already converted" for this mode.
    pub fn target_extensions(&self) -> &'static [&'static str] {
        match self {
            Mode::Quality | Mode::AutoPlus => &[".jxl", ".avif", ".mov"],
            Mode::Emoji => &[".avif"],
        }
    }

    /// Whether `extension` (lowercase, dotted) is a target format.
    pub fn is_target_extension(&self, extension: &str) -> bool {
        self.target_extensions().contains(&extension)
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::error::PixlyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quality" => Ok(Mode::Quality),
            "auto+" | "autoplus" | "auto_plus" => Ok(Mode::AutoPlus),
            "emoji" => Ok(Mode::Emoji),
            other => Err(crate::error::PixlyError::config(format!(
                "invalid mode: {} (expected quality, auto+, or emoji)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Quality => write!(f, "quality"),
            Mode::AutoPlus => write!(f, "auto+"),
            Mode::Emoji => write!(f, "emoji"),
        }
    }
}

/// Target container for an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetFormat {
    /// JPEG XL.
    Jxl,
    /// AVIF.
    Avif,
    /// QuickTime.
    Mov,
}

impl TargetFormat {
    /// Output extension, lowercase with the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Jxl => ".jxl",
            TargetFormat::Avif => ".avif",
            TargetFormat::Mov => ".mov",
        }
    }
}

/// Encoder effort tier; the governor downgrades under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effort {
    /// Maximum effort (JXL effort 9).
    High,
    /// Reduced effort under resource pressure (JXL effort 7).
    Medium,
}

impl Effort {
    /// Pick the effort tier admitted under the current pressure level.
    pub fn admitted(pressure: PressureLevel) -> Self {
        match pressure {
            PressureLevel::Normal => Effort::High,
            PressureLevel::Elevated | PressureLevel::Critical => Effort::Medium,
        }
    }
}

/// A step the worker runs before the main encode when the target encoder
/// cannot ingest the source format directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreProcessor {
    /// Decode the source to a temporary PNG.
    DecodeToPng,
    /// Extract the first frame of an animation to a temporary PNG.
    ExtractFirstFrame,
}

/// Acceptance rule for lossy probe results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Acceptance {
    /// Accept the first result whose reduction ratio falls inside the band;
    /// a reduction above the band at the ladder's first quality also wins.
    Band {
        /// Lower bound of the acceptable reduction ratio.
        low: f64,
        /// Upper bound of the acceptable reduction ratio.
        high: f64,
    },
    /// Score every result by `0.7·reduction + 0.3·(quality/100)`, reject
    /// anything below the saving floors, and pick the highest score.
    Scored {
        /// Minimum absolute saving in bytes.
        min_saving_bytes: u64,
        /// Minimum saving as a fraction of the original size.
        min_saving_ratio: f64,
    },
}

/// Bit-preserving container change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepackagePlan {
    /// Use the encoder's JPEG-lossless-recompression path so decoded
    /// pixels stay bit-identical.
    pub jpeg_recompression: bool,
    /// Saving floors; `None` accepts the output regardless of size change.
    pub floors: Option<(u64, f64)>,
}

/// Mathematically lossless re-encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LosslessPlan {
    /// Output container.
    pub target: TargetFormat,
    /// Pre-decode step, when the encoder cannot ingest the source.
    pub pre: Option<PreProcessor>,
    /// Effort tier at decision time; the worker re-checks the governor.
    pub effort: Effort,
}

/// Ordered set of lossy probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossyPlan {
    /// Output container.
    pub target: TargetFormat,
    /// Try a lossless encode before the quality ladder (emoji mode).
    pub try_lossless_first: bool,
    /// Descending quality ladder.
    pub qualities: Vec<u8>,
    /// How results are accepted.
    pub acceptance: Acceptance,
    /// Pre-decode step, when the encoder cannot ingest the source.
    pub pre: Option<PreProcessor>,
    /// Attempt a bit-preserving repackage before probing (balanced ladder
    /// step 1); only meaningful for JPEG and PNG inputs.
    pub repackage_first: bool,
}

/// A concrete recipe the worker can execute.
///
/// The closed variant set lets the scheduler inspect the operation kind for
/// resource planning without dynamic dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Bit-preserving container change (JPEG→JXL, PNG→JXL).
    Repackage(RepackagePlan),
    /// Mathematically lossless re-encode.
    LosslessReencode(LosslessPlan),
    /// Lossy probing with an acceptance rule.
    LossyProbe(LossyPlan),
    /// QuickTime container repackage, stream copy, fast-start flag.
    RepackageVideo,
    /// No work; recorded with a reason.
    Skip {
        /// Human-readable skip reason.
        reason: String,
    },
}

impl Operation {
    /// Convenience constructor for skips.
    pub fn skip(reason: impl Into<String>) -> Self {
        Operation::Skip {
            reason: reason.into(),
        }
    }

    /// Short method tag for results and checkpoints.
    pub fn method_tag(&self) -> &'static str {
        match self {
            Operation::Repackage(_) => "repackage",
            Operation::LosslessReencode(_) => "lossless",
            Operation::LossyProbe(_) => "lossy-probe",
            Operation::RepackageVideo => "mov-repackage",
            Operation::Skip { .. } => "skip",
        }
    }

    /// Whether executing this operation spawns an encoder process.
    pub fn is_encode(&self) -> bool {
        !matches!(self, Operation::Skip { .. })
    }
}

/// Tunables the decision functions read.
///
/// A thin borrow of [`crate::config::TuningConfig`] so the strategy stays a
/// pure function of its inputs.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    /// Emoji-mode acceptance band.
    pub emoji_accept_band: (f64, f64),
    /// Emoji-mode quality ladder.
    pub emoji_quality_ladder: Vec<u8>,
    /// Lossy ladder for high-quality inputs.
    pub lossy_ladder_high: Vec<u8>,
    /// Lossy ladder for everything else.
    pub lossy_ladder_default: Vec<u8>,
    /// Minimum absolute saving for balanced results.
    pub min_saving_bytes: u64,
    /// Minimum relative saving for balanced results.
    pub min_saving_ratio: f64,
}

impl From<&crate::config::TuningConfig> for StrategyParams {
    fn from(tuning: &crate::config::TuningConfig) -> Self {
        Self {
            emoji_accept_band: tuning.emoji_accept_band,
            emoji_quality_ladder: tuning.emoji_quality_ladder.clone(),
            lossy_ladder_high: tuning.lossy_ladder_high.clone(),
            lossy_ladder_default: tuning.lossy_ladder_default.clone(),
            min_saving_bytes: tuning.min_saving_bytes,
            min_saving_ratio: tuning.min_saving_ratio,
        }
    }
}

/// Reduction ratio `1 - new/original`; zero for empty originals.
pub fn reduction_ratio(original: u64, new_size: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    1.0 - new_size as f64 / original as f64
}

/// Whether a result clears both saving floors: the absolute byte floor and
/// the relative ratio floor.
pub fn meets_saving_floors(original: u64, new_size: u64, min_bytes: u64, min_ratio: f64) -> bool {
    let saved = original.saturating_sub(new_size);
    saved >= min_bytes && reduction_ratio(original, new_size) >= min_ratio
}

/// Balanced-optimization probe score: `0.7·reduction + 0.3·(quality/100)`.
pub fn probe_score(reduction: f64, quality: u8) -> f64 {
    0.7 * reduction + 0.3 * (quality as f64 / 100.0)
}

/// Pick the winning lossy probe under the scored acceptance rule.
///
/// `probes` pairs each quality with its output size. Results that fail
/// either saving floor are rejected; among the survivors the highest score
/// wins. `None` means the file keeps its original bytes.
pub fn select_scored_probe(
    probes: &[(u8, u64)],
    original: u64,
    min_saving_bytes: u64,
    min_saving_ratio: f64,
) -> Option<usize> {
    probes
        .iter()
        .enumerate()
        .filter(|(_, (_, size))| {
            meets_saving_floors(original, *size, min_saving_bytes, min_saving_ratio)
        })
        .max_by(|(_, (qa, sa)), (_, (qb, sb))| {
            let score_a = probe_score(reduction_ratio(original, *sa), *qa);
            let score_b = probe_score(reduction_ratio(original, *sb), *qb);
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(index, _)| index)
}

/// Decide the operation for one classified file.
///
/// Pure with respect to the filesystem: consumes only the scanned metadata
/// and probe results. The pressure level caps the admitted effort tier.
pub fn decide(
    mode: Mode,
    file: &MediaFile,
    info: &MediaInfo,
    params: &StrategyParams,
    pressure: PressureLevel,
) -> Operation {
    match mode {
        Mode::Quality => quality::decide(file, info, pressure),
        Mode::Emoji => emoji::decide(file, info, params, pressure),
        Mode::AutoPlus => auto_plus::decide(file, info, params, pressure),
    }
}
