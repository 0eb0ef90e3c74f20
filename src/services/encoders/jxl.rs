//! JPEG XL encoder argument construction.

use std::path::Path;

use crate::core::strategy::Effort;

/// Arguments for a mathematically lossless encode (`--distance=0`).
///
/// Effort 9 is the default; the governor downgrades to 7 under pressure.
pub fn lossless_args(input: &Path, output: &Path, effort: Effort) -> Vec<String> {
    vec![
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
        "--distance=0".to_string(),
        format!("--effort={}", effort_level(effort)),
    ]
}

/// Arguments for the JPEG-lossless-recompression path.
///
/// The encoder transcodes the JPEG bitstream so decoded pixels stay
/// bit-identical; the explicit flag guards against builds that default it
/// off.
pub fn jpeg_recompress_args(input: &Path, output: &Path, effort: Effort) -> Vec<String> {
    vec![
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
        "--lossless_jpeg=1".to_string(),
        format!("--effort={}", effort_level(effort)),
    ]
}

fn effort_level(effort: Effort) -> u8 {
    match effort {
        Effort::High => 9,
        Effort::Medium => 7,
    }
}
