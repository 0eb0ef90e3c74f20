//! Auto+ mode: adaptive, quality-aware routing.
//!
//! Routing order:
//! 1. Mathematically-lossless-eligible inputs (PNG, JPEG in yuv444p,
//!    near-noiseless PNG/JPEG) take the quality-mode lossless path
//!    unconditionally.
//! 2. The source quality heuristic classifies everything else.
//! 3. Essentially pristine inputs also route to lossless; the rest run the
//!    balanced-optimization ladder with a quality-dependent probe schedule.
//!
//! Balanced results are only accepted when they clear the saving floors
//! (both the absolute and the relative one); otherwise the file is skipped
//! with "no significant size reduction".

use log::trace;

use crate::core::media::{MediaFile, MediaInfo, MediaKind};
use crate::core::watchdog::PressureLevel;

use super::quality_estimate::{self, QualityClass};
use super::{
    Acceptance, LossyPlan, Operation, PreProcessor, StrategyParams, TargetFormat, quality,
};

/// Still formats the AVIF encoder cannot ingest directly.
const NEEDS_PNG_DECODE: &[&str] = &[".webp", ".gif", ".heic", ".heif", ".bmp", ".tif", ".tiff"];

/// Decide the auto+ operation for one file.
pub fn decide(
    file: &MediaFile,
    info: &MediaInfo,
    params: &StrategyParams,
    pressure: PressureLevel,
) -> Operation {
    // Video handling is identical to quality mode: repackage or skip.
    if file.kind == MediaKind::Video {
        return quality::decide(file, info, pressure);
    }
    if file.kind == MediaKind::Unknown {
        return Operation::skip("unknown kind");
    }

    let estimate = if info.quality_estimate > 0 {
        info.quality_estimate
    } else {
        quality_estimate::estimate(file, info)
    };
    let class = QualityClass::from_estimate(estimate);
    trace!(
        "auto+: {} estimate={} class={:?}",
        file.path.display(),
        estimate,
        class
    );

    if quality_estimate::is_lossless_eligible(file, info, estimate)
        || class == QualityClass::ExtremeHigh
        || info.animated
    {
        return quality::decide(file, info, pressure);
    }

    balanced(file, class, params)
}

/// Build the balanced-optimization plan.
///
/// The worker executes the ladder: bit-preserving repackage first for JPEG
/// and PNG inputs, a mathematical-lossless re-encode when repackage is
/// inapplicable or fails, then scored lossy probes.
fn balanced(file: &MediaFile, class: QualityClass, params: &StrategyParams) -> Operation {
    let qualities = if class >= QualityClass::High {
        params.lossy_ladder_high.clone()
    } else {
        params.lossy_ladder_default.clone()
    };
    let repackage_first = matches!(file.extension.as_str(), ".jpg" | ".jpeg" | ".png");
    let pre = NEEDS_PNG_DECODE
        .contains(&file.extension.as_str())
        .then_some(PreProcessor::DecodeToPng);
    Operation::LossyProbe(LossyPlan {
        target: TargetFormat::Avif,
        try_lossless_first: false,
        qualities,
        acceptance: Acceptance::Scored {
            min_saving_bytes: params.min_saving_bytes,
            min_saving_ratio: params.min_saving_ratio,
        },
        pre,
        repackage_first,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::MediaKind;
    use crate::core::strategy::RepackagePlan;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    fn file(ext: &str, size: u64, kind: MediaKind) -> MediaFile {
        MediaFile {
            path: PathBuf::from(format!("/data/input{ext}")),
            base_name: format!("input{ext}"),
            size,
            extension: ext.to_string(),
            modified: UNIX_EPOCH,
            kind,
            corrupted: false,
            codec_incompatible: false,
            container_incompatible: false,
        }
    }

    fn probe_info(width: u32, height: u32, pix_fmt: &str) -> MediaInfo {
        MediaInfo {
            width: Some(width),
            height: Some(height),
            pixel_format: Some(pix_fmt.to_string()),
            ..MediaInfo::default()
        }
    }

    fn params() -> StrategyParams {
        StrategyParams::from(&crate::config::TuningConfig::default())
    }

    #[test]
    fn test_png_routes_to_lossless_unconditionally() {
        let f = file(".png", 4 * 1024 * 1024, MediaKind::Image);
        let op = decide(&f, &MediaInfo::default(), &params(), PressureLevel::Normal);
        assert!(matches!(op, Operation::LosslessReencode(_)));
    }

    #[test]
    fn test_yuv444_jpeg_routes_to_lossless() {
        let f = file(".jpg", 2 * 1024 * 1024, MediaKind::Image);
        let op = decide(
            &f,
            &probe_info(4000, 3000, "yuv444p"),
            &params(),
            PressureLevel::Normal,
        );
        // Quality mode sends JPEG stills through the recompression path.
        assert!(matches!(
            op,
            Operation::Repackage(RepackagePlan {
                jpeg_recompression: true,
                ..
            })
        ));
    }

    #[test]
    fn test_consumer_jpeg_runs_balanced_with_default_ladder() {
        // 2 MiB over 12 MP is thin for a JPEG; classifies below High.
        let f = file(".jpg", 2 * 1024 * 1024, MediaKind::Image);
        let op = decide(
            &f,
            &probe_info(4000, 3000, "yuv420p"),
            &params(),
            PressureLevel::Normal,
        );
        match op {
            Operation::LossyProbe(plan) => {
                assert_eq!(plan.qualities, vec![60, 55]);
                assert!(plan.repackage_first);
                assert!(!plan.try_lossless_first);
                assert_eq!(
                    plan.acceptance,
                    Acceptance::Scored {
                        min_saving_bytes: 1024,
                        min_saving_ratio: 0.05
                    }
                );
            }
            other => panic!("expected lossy probe, got {other:?}"),
        }
    }

    #[test]
    fn test_high_quality_jpeg_uses_high_ladder() {
        // 2 MiB over ~2.6 MP is dense enough for the High class without
        // crossing into the essentially-pristine band.
        let f = file(".jpg", 2 * 1024 * 1024, MediaKind::Image);
        let op = decide(
            &f,
            &probe_info(1920, 1365, "yuv420p"),
            &params(),
            PressureLevel::Normal,
        );
        match op {
            Operation::LossyProbe(plan) => {
                assert_eq!(plan.qualities, vec![90, 85, 75]);
            }
            other => panic!("expected lossy probe, got {other:?}"),
        }
    }

    #[test]
    fn test_webp_balanced_has_predecode_and_no_repackage() {
        let f = file(".webp", 500 * 1024, MediaKind::Image);
        let op = decide(
            &f,
            &probe_info(2000, 2000, "yuv420p"),
            &params(),
            PressureLevel::Normal,
        );
        match op {
            Operation::LossyProbe(plan) => {
                assert!(!plan.repackage_first);
                assert_eq!(plan.pre, Some(PreProcessor::DecodeToPng));
            }
            other => panic!("expected lossy probe, got {other:?}"),
        }
    }

    #[test]
    fn test_animated_input_routes_to_lossless_avif() {
        let f = file(".gif", 100 * 1024, MediaKind::Image);
        let info = MediaInfo {
            animated: true,
            frame_count: 8,
            ..MediaInfo::default()
        };
        let op = decide(&f, &info, &params(), PressureLevel::Normal);
        match op {
            Operation::LosslessReencode(plan) => {
                assert_eq!(plan.target, TargetFormat::Avif);
            }
            other => panic!("expected lossless avif, got {other:?}"),
        }
    }

    #[test]
    fn test_video_delegates_to_quality_rules() {
        let mut f = file(".mp4", 10 * 1024 * 1024, MediaKind::Video);
        assert_eq!(
            decide(&f, &MediaInfo::default(), &params(), PressureLevel::Normal),
            Operation::RepackageVideo
        );
        f.codec_incompatible = true;
        assert_eq!(
            decide(&f, &MediaInfo::default(), &params(), PressureLevel::Normal),
            Operation::skip("codec incompatible with MOV")
        );
    }
}
