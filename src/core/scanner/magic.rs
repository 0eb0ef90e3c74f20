//! Magic-number detection over the first 32 bytes of a file.
//!
//! The table is fixed: JPEG, PNG, GIF, RIFF/WebP, ISO BMFF variants,
//! Matroska/WebM, FLV, ASF, and JPEG XL. Detection is only consulted when
//! the extension is unknown, the file is empty, or the file is unusually
//! large; everything else is trusted on extension alone.

/// Number of leading bytes the scanner reads for detection.
pub const MAGIC_HEADER_LEN: usize = 32;

/// A container detected from file magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedContainer {
    /// Human-readable container name.
    pub name: &'static str,
    /// Canonical lowercase extension with the leading dot.
    pub extension: &'static str,
}

const fn container(name: &'static str, extension: &'static str) -> DetectedContainer {
    DetectedContainer { name, extension }
}

/// Detect a container from the first bytes of a file.
///
/// Returns `None` when the header matches nothing in the table or is too
/// short to decide.
pub fn detect_container(header: &[u8]) -> Option<DetectedContainer> {
    if header.len() < 4 {
        return None;
    }

    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(container("jpeg", ".jpg"));
    }
    if header.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(container("png", ".png"));
    }
    if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        return Some(container("gif", ".gif"));
    }
    if header.starts_with(b"RIFF") && header.len() >= 12 && &header[8..12] == b"WEBP" {
        return Some(container("webp", ".webp"));
    }
    // Bare JPEG XL codestream or its ISOBMFF-style box container.
    if header.starts_with(&[0xFF, 0x0A])
        || header.starts_with(&[0x00, 0x00, 0x00, 0x0C, 0x4A, 0x58, 0x4C, 0x20])
    {
        return Some(container("jxl", ".jxl"));
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        // The EBML DocType sits within the first bytes for both formats.
        if contains(header, b"webm") {
            return Some(container("webm", ".webm"));
        }
        return Some(container("matroska", ".mkv"));
    }
    if header.starts_with(b"FLV\x01") {
        return Some(container("flv", ".flv"));
    }
    if header.starts_with(&[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11]) {
        return Some(container("asf", ".wmv"));
    }
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return Some(detect_bmff_brand(&header[8..12]));
    }

    None
}

/// Map an ISO BMFF major brand to its canonical extension.
fn detect_bmff_brand(brand: &[u8]) -> DetectedContainer {
    match brand {
        b"avif" | b"avis" => container("avif", ".avif"),
        b"heic" | b"heix" | b"hevc" | b"hevx" => container("heic", ".heic"),
        b"mif1" | b"msf1" => container("heif", ".heif"),
        b"qt  " => container("quicktime", ".mov"),
        b"M4V " | b"M4VH" => container("m4v", ".m4v"),
        // isom, iso2, mp41, mp42, and any unlisted brand.
        _ => container("mp4", ".mp4"),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
