//! AVIF encoder argument construction.
//!
//! Still images go through avifenc; animations go through the media
//! processor with the AV1 still-picture flag cleared.

use std::path::Path;

/// avifenc arguments for a lossless still encode.
///
/// CICP 1/13/1 approximates sRGB; full range avoids limited-range
/// mis-detection downstream.
pub fn lossless_still_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "--lossless".to_string(),
        "--depth".to_string(),
        "10".to_string(),
        "--yuv".to_string(),
        "444".to_string(),
        "--cicp".to_string(),
        "1/13/1".to_string(),
        "--range".to_string(),
        "full".to_string(),
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
    ]
}

/// avifenc arguments for a lossy still encode at the given quality.
pub fn quality_still_args(input: &Path, output: &Path, quality: u8) -> Vec<String> {
    vec![
        "-q".to_string(),
        quality.to_string(),
        "--speed".to_string(),
        "6".to_string(),
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Media-processor arguments for an animated AVIF encode.
///
/// `quality` of `None` selects the lossless AV1 path.
pub fn animated_args(input: &Path, output: &Path, quality: Option<u8>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "libaom-av1".to_string(),
        "-still-picture".to_string(),
        "0".to_string(),
    ];
    match quality {
        None => {
            args.push("-aom-params".to_string());
            args.push("lossless=1".to_string());
        }
        Some(quality) => {
            args.push("-crf".to_string());
            args.push(quality_to_crf(quality).to_string());
            args.push("-b:v".to_string());
            args.push("0".to_string());
        }
    }
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Map a 1..=100 quality onto the AV1 0..=63 CRF scale (inverted).
pub fn quality_to_crf(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (63 - (quality * 63 / 100)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossless_still_args() {
        let args = lossless_still_args(Path::new("/in/a.png"), Path::new("/out/a.avif"));
        assert_eq!(args[0], "--lossless");
        assert!(args.windows(2).any(|w| w == ["--cicp", "1/13/1"]));
        assert!(args.windows(2).any(|w| w == ["--range", "full"]));
        assert_eq!(args.last().unwrap(), "/out/a.avif");
    }

    #[test]
    fn test_quality_still_args() {
        let args = quality_still_args(Path::new("/in/a.png"), Path::new("/out/a.avif"), 60);
        assert!(args.windows(2).any(|w| w == ["-q", "60"]));
    }

    #[test]
    fn test_quality_to_crf_monotonic() {
        assert_eq!(quality_to_crf(100), 0);
        assert!(quality_to_crf(60) > quality_to_crf(90));
        assert!(quality_to_crf(20) > quality_to_crf(60));
        assert!(quality_to_crf(1) <= 63);
    }

    #[test]
    fn test_animated_lossless_args() {
        let args = animated_args(Path::new("/in/a.gif"), Path::new("/out/a.avif"), None);
        assert!(args.windows(2).any(|w| w == ["-aom-params", "lossless=1"]));
        assert!(args.windows(2).any(|w| w == ["-still-picture", "0"]));
    }

    #[test]
    fn test_animated_quality_args() {
        let args = animated_args(Path::new("/in/a.gif"), Path::new("/out/a.avif"), Some(60));
        let crf = quality_to_crf(60).to_string();
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == crf));
    }
}
