//! Emoji mode: aggressive size reduction for stickers.
//!
//! The target is always AVIF. A lossless attempt runs first; when its
//! reduction misses the acceptance band, a fixed descending quality ladder
//! takes over and the first banded result wins. Video files are skipped
//! outright.

use crate::core::media::{MediaFile, MediaInfo, MediaKind};
use crate::core::watchdog::PressureLevel;

use super::{Acceptance, LossyPlan, Operation, PreProcessor, StrategyParams, TargetFormat};

/// Still formats the AVIF encoder cannot ingest directly.
const NEEDS_PNG_DECODE: &[&str] = &[".webp", ".gif", ".heic", ".heif", ".bmp", ".tif", ".tiff"];

/// Decide the emoji-mode operation for one file.
pub fn decide(
    file: &MediaFile,
    info: &MediaInfo,
    params: &StrategyParams,
    _pressure: PressureLevel,
) -> Operation {
    match file.kind {
        MediaKind::Video => Operation::skip("video in emoji mode"),
        MediaKind::Unknown => Operation::skip("unknown kind"),
        MediaKind::Image => {
            // Animated inputs go through the media processor which decodes
            // any animated source; stills may need a PNG pre-decode.
            let pre = (!info.animated && NEEDS_PNG_DECODE.contains(&file.extension.as_str()))
                .then_some(PreProcessor::DecodeToPng);
            let (low, high) = params.emoji_accept_band;
            Operation::LossyProbe(LossyPlan {
                target: TargetFormat::Avif,
                try_lossless_first: true,
                qualities: params.emoji_quality_ladder.clone(),
                acceptance: Acceptance::Band { low, high },
                pre,
                repackage_first: false,
            })
        }
    }
}
