//! Quality mode: lossless, format-forcing.
//!
//! Stills become lossless JPEG XL (with the JPEG-recompression path for JPEG
//! inputs), animations become lossless AVIF, and videos are repackaged into
//! QuickTime by stream copy. Nothing lossy ever runs in this mode.

use crate::core::media::{MediaFile, MediaInfo, MediaKind};
use crate::core::watchdog::PressureLevel;

use super::{Effort, LosslessPlan, Operation, PreProcessor, RepackagePlan, TargetFormat};

/// Source formats the JXL encoder cannot ingest directly.
const NEEDS_PNG_DECODE: &[&str] = &[".webp", ".heic", ".heif", ".bmp", ".tif", ".tiff"];

/// Video codecs that cannot be stream-copied into a QuickTime container.
const MOV_INCOMPATIBLE_CODECS: &[&str] = &["vp8", "vp9", "av1"];

/// Decide the quality-mode operation for one file.
pub fn decide(file: &MediaFile, info: &MediaInfo, pressure: PressureLevel) -> Operation {
    match file.kind {
        MediaKind::Video => decide_video(file, info),
        MediaKind::Image => decide_image(file, info, pressure),
        MediaKind::Unknown => Operation::skip("unknown kind"),
    }
}

fn decide_video(file: &MediaFile, info: &MediaInfo) -> Operation {
    // The flag comes from the deep probe; the codec check also covers
    // trusted files whose extension implies the codec (webm, mkv).
    if file.codec_incompatible || MOV_INCOMPATIBLE_CODECS.contains(&info.codec.to_lowercase().as_str())
    {
        return Operation::skip("codec incompatible with MOV");
    }
    if file.container_incompatible {
        return Operation::skip("container incompatible with MOV");
    }
    Operation::RepackageVideo
}

fn decide_image(file: &MediaFile, info: &MediaInfo, pressure: PressureLevel) -> Operation {
    if info.animated {
        return Operation::LosslessReencode(LosslessPlan {
            target: TargetFormat::Avif,
            pre: None,
            effort: Effort::admitted(pressure),
        });
    }
    if matches!(file.extension.as_str(), ".jpg" | ".jpeg") {
        // Bit-identical decoded pixels via the JPEG-lossless path; accepted
        // regardless of the size outcome.
        return Operation::Repackage(RepackagePlan {
            jpeg_recompression: true,
            floors: None,
        });
    }
    let pre = NEEDS_PNG_DECODE
        .contains(&file.extension.as_str())
        .then_some(PreProcessor::DecodeToPng);
    Operation::LosslessReencode(LosslessPlan {
        target: TargetFormat::Jxl,
        pre,
        effort: Effort::admitted(pressure),
    })
}
