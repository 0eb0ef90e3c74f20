//! Additive suspicion scoring.
//!
//! The score is a routing hint only: files at or above the probe threshold
//! get a deep probe, everything else is trusted on extension alone. The
//! weights are published so operators can reason about routing.

use std::time::{Duration, SystemTime};

use crate::core::media::{MediaFile, MediaKind};

/// Weight for an extension outside the recognized image/video sets.
pub const WEIGHT_UNKNOWN_EXTENSION: u8 = 20;
/// Weight for a zero-byte file.
pub const WEIGHT_ZERO_BYTE: u8 = 25;
/// Weight for a file larger than [`LARGE_FILE_BYTES`].
pub const WEIGHT_OVERSIZED: u8 = 15;
/// Weight for a missing extension.
pub const WEIGHT_NO_EXTENSION: u8 = 10;
/// Weight for a suspicious name fragment.
pub const WEIGHT_SUSPICIOUS_NAME: u8 = 5;
/// Weight for a file modified within the last 24 hours.
pub const WEIGHT_RECENTLY_MODIFIED: u8 = 3;
/// Weight for a magic number that disagrees with the extension.
pub const WEIGHT_MAGIC_MISMATCH: u8 = 15;

/// Files above this size always get the magic check and the size weight.
pub const LARGE_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Name fragments that usually mark temporaries and caches.
const SUSPICIOUS_FRAGMENTS: &[&str] = &["temp", "tmp", "cache", ".partial", ".bak", "~"];

/// A computed suspicion score with its contributing reasons.
#[derive(Debug, Clone, Default)]
pub struct SuspicionScore {
    /// Saturating sum of the triggered weights, capped at 100.
    pub score: u8,
    /// One entry per triggered rule.
    pub reasons: Vec<String>,
}

/// Compute the suspicion score for a scanned file.
///
/// `magic_mismatch` is supplied by the scanner when the magic check ran and
/// disagreed with the extension.
pub fn score(file: &MediaFile, magic_mismatch: bool, now: SystemTime) -> SuspicionScore {
    let mut result = SuspicionScore::default();
    let mut add = |weight: u8, reason: &str| {
        result.score = result.score.saturating_add(weight).min(100);
        result.reasons.push(reason.to_string());
    };

    if file.extension.is_empty() {
        add(WEIGHT_NO_EXTENSION, "no extension");
    } else if file.kind == MediaKind::Unknown {
        add(WEIGHT_UNKNOWN_EXTENSION, "unknown extension");
    }
    if file.size == 0 {
        add(WEIGHT_ZERO_BYTE, "zero-byte file");
    }
    if file.size > LARGE_FILE_BYTES {
        add(WEIGHT_OVERSIZED, "file larger than 100 MiB");
    }
    let lower_name = file.base_name.to_lowercase();
    if SUSPICIOUS_FRAGMENTS
        .iter()
        .any(|fragment| lower_name.contains(fragment))
    {
        add(WEIGHT_SUSPICIOUS_NAME, "suspicious name fragment");
    }
    if let Ok(age) = now.duration_since(file.modified) {
        if age < Duration::from_secs(24 * 60 * 60) {
            add(WEIGHT_RECENTLY_MODIFIED, "modified within last 24 hours");
        }
    }
    if magic_mismatch {
        add(WEIGHT_MAGIC_MISMATCH, "magic number disagrees with extension");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    fn media_file(name: &str, ext: &str, size: u64) -> MediaFile {
        MediaFile {
            path: PathBuf::from(format!("/data/{name}")),
            base_name: name.to_string(),
            size,
            extension: ext.to_string(),
            modified: UNIX_EPOCH,
            kind: MediaKind::from_extension(ext),
            corrupted: false,
            codec_incompatible: false,
            container_incompatible: false,
        }
    }

    fn old_clock() -> SystemTime {
        // Far enough from UNIX_EPOCH that nothing counts as recent.
        UNIX_EPOCH + Duration::from_secs(10 * 365 * 24 * 3600)
    }

    #[test]
    fn test_clean_file_scores_zero() {
        let file = media_file("photo.jpg", ".jpg", 2048);
        let result = score(&file, false, old_clock());
        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_zero_byte_unknown_extension_crosses_threshold() {
        let file = media_file("blob.dat", ".dat", 0);
        let result = score(&file, false, old_clock());
        // 20 (unknown extension) + 25 (zero byte) = 45, below 50.
        assert_eq!(result.score, 45);

        let result = score(&file, true, old_clock());
        // Adding the magic mismatch pushes it over the probe threshold.
        assert_eq!(result.score, 60);
        assert!(
            result
                .reasons
                .iter()
                .any(|r| r.contains("magic number disagrees"))
        );
    }

    #[test]
    fn test_no_extension_is_not_unknown_extension() {
        let file = media_file("README", "", 100);
        let result = score(&file, false, old_clock());
        assert_eq!(result.score, WEIGHT_NO_EXTENSION);
    }

    #[test]
    fn test_oversized_file_weight() {
        let file = media_file("huge.mp4", ".mp4", LARGE_FILE_BYTES + 1);
        let result = score(&file, false, old_clock());
        assert_eq!(result.score, WEIGHT_OVERSIZED);
    }

    #[test]
    fn test_suspicious_fragment_and_recent_mtime() {
        let mut file = media_file("render_tmp.png", ".png", 10);
        file.modified = old_clock();
        let result = score(&file, false, old_clock() + Duration::from_secs(3600));
        assert_eq!(
            result.score,
            WEIGHT_SUSPICIOUS_NAME + WEIGHT_RECENTLY_MODIFIED
        );
    }

    #[test]
    fn test_score_saturates_at_100() {
        let mut file = media_file("0_tmp_copy.dat", ".dat", 0);
        file.size = 0;
        file.modified = old_clock();
        let result = score(&file, true, old_clock());
        assert!(result.score <= 100);
    }
}
