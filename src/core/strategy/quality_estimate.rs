//! Format-specific source quality estimation.
//!
//! The heuristic combines pixel density (bytes per megapixel), pixel format,
//! color space, and file-size outliers into an integer estimate mapped onto
//! five classes. It is deliberately coarse; the classes only steer routing
//! between lossless paths and the lossy ladders.

use crate::core::media::{MediaFile, MediaInfo};

/// Estimated source quality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityClass {
    /// Visibly degraded source.
    ExtremeLow,
    /// Below-average quality.
    Low,
    /// Typical consumer quality.
    Medium,
    /// High-quality source.
    High,
    /// Essentially pristine.
    ExtremeHigh,
}

impl QualityClass {
    /// Map an integer estimate (1..=100) onto a class.
    pub fn from_estimate(estimate: u8) -> Self {
        match estimate {
            90..=100 => QualityClass::ExtremeHigh,
            75..=89 => QualityClass::High,
            50..=74 => QualityClass::Medium,
            25..=49 => QualityClass::Low,
            _ => QualityClass::ExtremeLow,
        }
    }
}

/// Megapixels assumed when the probe supplied no dimensions.
const DEFAULT_MEGAPIXELS: f64 = 8.0;

/// Estimate source quality as an integer in 1..=100.
///
/// Baselines are format-specific: lossless formats score on raw density,
/// JPEG on its much lower compressed density.
pub fn estimate(file: &MediaFile, info: &MediaInfo) -> u8 {
    let megapixels = info.megapixels().unwrap_or(DEFAULT_MEGAPIXELS).max(0.01);
    let bytes_per_mp = file.size as f64 / megapixels;

    let mut score: f64 = match file.extension.as_str() {
        ".jpg" | ".jpeg" => density_score(bytes_per_mp, &[80_000.0, 200_000.0, 450_000.0, 900_000.0]),
        ".png" | ".bmp" | ".tif" | ".tiff" => {
            density_score(bytes_per_mp, &[300_000.0, 800_000.0, 1_800_000.0, 3_500_000.0])
        }
        ".webp" | ".heic" | ".heif" => {
            density_score(bytes_per_mp, &[50_000.0, 120_000.0, 280_000.0, 600_000.0])
        }
        ".gif" => density_score(bytes_per_mp, &[100_000.0, 250_000.0, 500_000.0, 1_000_000.0]),
        _ => 50.0,
    };

    // Chroma-preserving pixel formats mark a deliberate quality choice.
    match info.pixel_format.as_deref() {
        Some(pf) if pf.contains("444") || pf.starts_with("rgb") || pf.starts_with("rgba") => {
            score += 10.0;
        }
        Some(pf) if pf.contains("422") => score += 4.0,
        _ => {}
    }
    if let Some(cs) = info.color_space.as_deref() {
        if cs.contains("2020") || cs.contains("p3") {
            score += 5.0;
        }
    }
    // A single image far beyond the large-file mark is an outlier either
    // way; nudge it toward the lossless routes.
    if file.size > 50 * 1024 * 1024 {
        score += 5.0;
    }

    score.clamp(1.0, 100.0).round() as u8
}

/// Piecewise-linear density score against four ascending thresholds mapped
/// to the 20/40/60/80 class boundaries.
fn density_score(bytes_per_mp: f64, thresholds: &[f64; 4]) -> f64 {
    let bands = [20.0, 40.0, 60.0, 80.0, 100.0];
    let mut lower = 0.0;
    for (idx, threshold) in thresholds.iter().enumerate() {
        if bytes_per_mp < *threshold {
            let span = threshold - lower;
            let frac = if span > 0.0 {
                (bytes_per_mp - lower) / span
            } else {
                1.0
            };
            let base = if idx == 0 { 0.0 } else { bands[idx - 1] };
            return base + frac * (bands[idx] - base);
        }
        lower = *threshold;
    }
    100.0
}

/// Whether the input qualifies for the unconditional mathematically
/// lossless route: PNG, JPEG recognized as yuv444p, or PNG/JPEG with
/// extremely low estimated noise.
pub fn is_lossless_eligible(file: &MediaFile, info: &MediaInfo, estimate: u8) -> bool {
    match file.extension.as_str() {
        ".png" => true,
        ".jpg" | ".jpeg" => {
            info.pixel_format.as_deref().is_some_and(|pf| pf.contains("444"))
                || estimate >= 95
        }
        _ => false,
    }
}
