//! Integration tests for the scan/classify stage: extension filtering,
//! magic correction, target-format short-circuit, and suspicion routing.

use std::fs;
use std::path::Path;

use pixly::core::scanner::{ScanOutcome, Scanner};
use pixly::core::scanner::suspicion;
use pixly::core::strategy::Mode;
use tempfile::TempDir;

const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

fn scan(root: &Path, mode: Mode) -> ScanOutcome {
    Scanner::new(root, mode, 50).scan().unwrap()
}

#[test]
fn test_mixed_tree_scan() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("sub")).unwrap();
    fs::write(tmp.path().join("photo.jpg"), JPEG_HEADER).unwrap();
    fs::write(tmp.path().join("sub/art.png"), PNG_HEADER).unwrap();
    fs::write(tmp.path().join("notes.txt"), b"not media").unwrap();
    fs::write(tmp.path().join("clip.mp4"), vec![0u8; 128]).unwrap();

    let outcome = scan(tmp.path(), Mode::Quality);
    assert_eq!(outcome.visited, 4);
    assert_eq!(outcome.candidates.len(), 3);

    let extensions: Vec<&str> = outcome
        .candidates
        .iter()
        .map(|c| c.file.extension.as_str())
        .collect();
    assert!(extensions.contains(&".jpg"));
    assert!(extensions.contains(&".png"));
    assert!(extensions.contains(&".mp4"));
}

#[test]
fn test_target_skip_is_a_hard_contract() {
    let tmp = TempDir::new().unwrap();
    // Real target extensions.
    fs::write(tmp.path().join("a.jxl"), &[0xFF, 0x0A, 0, 0]).unwrap();
    fs::write(tmp.path().join("b.mov"), vec![0u8; 64]).unwrap();
    // A disguised JXL: wrong extension, magic corrects it.
    let mut disguised = vec![0xFF, 0x0A];
    disguised.resize(32, 0);
    fs::write(tmp.path().join("c.mystery"), &disguised).unwrap();

    let outcome = scan(tmp.path(), Mode::Quality);
    assert!(outcome.candidates.is_empty());
    assert_eq!(outcome.skipped.len(), 3);
    for skipped in &outcome.skipped {
        assert_eq!(skipped.skip_reason.as_deref(), Some("already target format"));
        assert!(skipped.skipped);
    }
}

#[test]
fn test_emoji_mode_only_avif_is_target() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.jxl"), &[0xFF, 0x0A, 0, 0]).unwrap();

    // In emoji mode a JXL is not "already converted".
    let outcome = scan(tmp.path(), Mode::Emoji);
    assert_eq!(outcome.candidates.len(), 1);
    assert!(outcome.skipped.is_empty());
}

#[test]
fn test_suspicion_routing_threshold() {
    let tmp = TempDir::new().unwrap();
    // Clean file: trusted, no probe.
    fs::write(tmp.path().join("clean.jpg"), JPEG_HEADER).unwrap();
    // Zero-byte file with a temp-ish name: suspicious.
    fs::write(tmp.path().join("render_tmp.jpg"), b"").unwrap();

    let outcome = scan(tmp.path(), Mode::Quality);
    let clean = outcome
        .candidates
        .iter()
        .find(|c| c.file.base_name == "clean.jpg")
        .unwrap();
    let suspicious = outcome
        .candidates
        .iter()
        .find(|c| c.file.base_name == "render_tmp.jpg")
        .unwrap();

    // The recent-mtime weight applies to both (just written); only the
    // zero-byte one accumulates enough to matter.
    assert!(clean.info.suspicion_score < 50);
    assert!(!clean.needs_probe);
    assert!(suspicious.info.suspicion_score >= 25);
    assert_eq!(
        suspicious.needs_probe,
        suspicious.info.suspicion_score >= 50
    );
}

#[test]
fn test_published_suspicion_weights() {
    assert_eq!(suspicion::WEIGHT_UNKNOWN_EXTENSION, 20);
    assert_eq!(suspicion::WEIGHT_ZERO_BYTE, 25);
    assert_eq!(suspicion::WEIGHT_OVERSIZED, 15);
    assert_eq!(suspicion::WEIGHT_NO_EXTENSION, 10);
    assert_eq!(suspicion::WEIGHT_SUSPICIOUS_NAME, 5);
    assert_eq!(suspicion::WEIGHT_RECENTLY_MODIFIED, 3);
    assert_eq!(suspicion::WEIGHT_MAGIC_MISMATCH, 15);
}

#[test]
fn test_live_photo_pair_skipped_in_every_mode() {
    for mode in [Mode::Quality, Mode::AutoPlus, Mode::Emoji] {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("IMG_0001.HEIC"), vec![0u8; 64]).unwrap();
        fs::write(tmp.path().join("IMG_0001.MOV"), vec![0u8; 64]).unwrap();

        let outcome = scan(tmp.path(), mode);
        let live: Vec<_> = outcome
            .skipped
            .iter()
            .filter(|r| r.skip_reason.as_deref() == Some("live photo"))
            .collect();
        assert_eq!(live.len(), 1, "mode {mode} must skip the live photo");
        assert!(
            !outcome
                .candidates
                .iter()
                .any(|c| c.file.base_name == "IMG_0001.HEIC")
        );
    }
}

#[test]
fn test_denylisted_output_trees_not_rescanned() {
    let tmp = TempDir::new().unwrap();
    for dir in ["backups", "results", "logs", "reports", ".trash"] {
        fs::create_dir(tmp.path().join(dir)).unwrap();
        fs::write(tmp.path().join(dir).join("x.jpg"), JPEG_HEADER).unwrap();
    }
    fs::write(tmp.path().join("real.jpg"), JPEG_HEADER).unwrap();

    let outcome = scan(tmp.path(), Mode::Quality);
    assert_eq!(outcome.visited, 1);
    assert_eq!(outcome.candidates.len(), 1);
}
