//! Deep media introspection.
//!
//! The prober is the only component allowed to execute the introspection
//! tool. It parses the tool's JSON (`format` plus `streams[]`) into the
//! optional fields of [`MediaInfo`]. A file with zero streams is corrupted
//! by definition.

use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::ToolsConfig;
use crate::core::media::{MediaFile, MediaInfo};
use crate::error::PixlyError;
use crate::services::invoker::{ToolInvoker, ToolKind};

/// Top-level introspection output.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    format_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    pix_fmt: Option<String>,
    #[serde(default)]
    color_space: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
}

/// Deep probe wrapper around the introspection tool.
pub struct Prober {
    invoker: Arc<ToolInvoker>,
    ffprobe: std::path::PathBuf,
}

impl Prober {
    /// Create a prober using the configured introspection binary.
    pub fn new(invoker: Arc<ToolInvoker>, tools: &ToolsConfig) -> Self {
        Self {
            invoker,
            ffprobe: ToolKind::Ffprobe.resolve(tools),
        }
    }

    /// Probe one file and merge the structured result into `info`.
    ///
    /// Errors (tool failure, unparsable output, zero streams) mean the file
    /// must be treated as corrupted by the caller.
    pub async fn probe(
        &self,
        file: &MediaFile,
        info: &mut MediaInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            file.path.to_string_lossy().into_owned(),
        ];
        let output = self
            .invoker
            .invoke(&self.ffprobe, &args, cancel)
            .await
            .map_err(|err| match err {
                PixlyError::Cancelled | PixlyError::DeadlineExceeded(_) => err,
                other => PixlyError::probe(&file.path, other.to_string()),
            })?;

        let parsed: ProbeOutput = serde_json::from_str(json_slice(&output))
            .map_err(|err| PixlyError::probe(&file.path, format!("unparsable output: {err}")))?;
        merge(file, info, parsed)
    }
}

/// Extract the JSON object from combined tool output.
///
/// The introspection tool may prepend banner lines on stderr; the JSON body
/// always starts at the first brace.
fn json_slice(output: &str) -> &str {
    match output.find('{') {
        Some(start) => &output[start..],
        None => output,
    }
}

fn merge(file: &MediaFile, info: &mut MediaInfo, parsed: ProbeOutput) -> Result<()> {
    if parsed.streams.is_empty() {
        return Err(PixlyError::probe(&file.path, "no streams found"));
    }

    if let Some(format) = parsed.format {
        if let Some(name) = format.format_name {
            info.container = name;
        }
        info.duration_secs = format.duration.and_then(|d| d.parse().ok());
        info.bitrate = format.bit_rate.and_then(|b| b.parse().ok());
    }

    info.has_audio = Some(
        parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    );

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PixlyError::probe(&file.path, "no video stream"))?;

    if let Some(codec) = &video.codec_name {
        info.codec = codec.clone();
    }
    info.width = video.width;
    info.height = video.height;
    info.pixel_format = video.pix_fmt.clone();
    info.color_space = video.color_space.clone();
    info.frame_rate = video.avg_frame_rate.as_deref().and_then(parse_frame_rate);

    if let Some(frames) = video.nb_frames.as_deref().and_then(|n| n.parse().ok()) {
        info.frame_count = frames;
    } else if let (Some(duration), Some(rate)) = (info.duration_secs, info.frame_rate) {
        info.frame_count = (duration * rate).round().max(1.0) as u64;
    }

    info.animated = is_animated(info);
    debug!(
        "probe: {} codec={} frames={} animated={}",
        file.path.display(),
        info.codec,
        info.frame_count,
        info.animated
    );
    Ok(())
}

/// Parse an `N/D` frame-rate fraction; `0/0` yields `None`.
pub fn parse_frame_rate(fraction: &str) -> Option<f64> {
    let (num, den) = fraction.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Animation rule: a frame rate strictly above 1/1, or a known-animated
/// container (GIF, animated WebP, APNG, animated AVIF, HEIC sequence).
fn is_animated(info: &MediaInfo) -> bool {
    if info.frame_rate.is_some_and(|rate| rate > 1.0) {
        return true;
    }
    let container = info.container.to_lowercase();
    if container.contains("gif") || info.codec == "apng" {
        return true;
    }
    if info.frame_count > 1
        && matches!(info.codec.as_str(), "webp" | "av1" | "hevc" | "vp8" | "vp9")
    {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    use crate::core::media::MediaKind;

    fn media_file(path: &str) -> MediaFile {
        MediaFile {
            path: PathBuf::from(path),
            base_name: "x".to_string(),
            size: 100,
            extension: ".mp4".to_string(),
            modified: UNIX_EPOCH,
            kind: MediaKind::Video,
            corrupted: false,
            codec_incompatible: false,
            container_incompatible: false,
        }
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("30000/1001").map(|r| r.round()), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_merge_zero_streams_is_corrupted() {
        let file = media_file("/data/empty.mp4");
        let mut info = MediaInfo::default();
        let parsed: ProbeOutput = serde_json::from_str(r#"{"streams": []}"#).unwrap();
        let result = merge(&file, &mut info, parsed);
        assert!(matches!(result, Err(PixlyError::Probe { .. })));
    }

    #[test]
    fn test_merge_video_stream() {
        let file = media_file("/data/clip.mp4");
        let mut info = MediaInfo::default();
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{
                "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.5", "bit_rate": "2000000"},
                "streams": [
                    {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                     "pix_fmt": "yuv420p", "avg_frame_rate": "30/1", "nb_frames": "315"},
                    {"codec_type": "audio", "codec_name": "aac"}
                ]
            }"#,
        )
        .unwrap();
        merge(&file, &mut info, parsed).unwrap();
        assert_eq!(info.codec, "h264");
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.frame_count, 315);
        assert_eq!(info.has_audio, Some(true));
        assert!(info.animated);
        assert_eq!(info.pixel_format.as_deref(), Some("yuv420p"));
    }

    #[test]
    fn test_merge_still_image_not_animated() {
        let file = media_file("/data/photo.jpg");
        let mut info = MediaInfo::default();
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{
                "format": {"format_name": "image2"},
                "streams": [
                    {"codec_type": "video", "codec_name": "mjpeg", "width": 4032, "height": 3024,
                     "pix_fmt": "yuvj420p", "avg_frame_rate": "0/0", "nb_frames": "1"}
                ]
            }"#,
        )
        .unwrap();
        merge(&file, &mut info, parsed).unwrap();
        assert!(!info.animated);
        assert_eq!(info.frame_count, 1);
    }

    #[test]
    fn test_gif_container_is_animated() {
        let file = media_file("/data/anim.gif");
        let mut info = MediaInfo::default();
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{
                "format": {"format_name": "gif"},
                "streams": [
                    {"codec_type": "video", "codec_name": "gif", "width": 100, "height": 100,
                     "avg_frame_rate": "1/1", "nb_frames": "5"}
                ]
            }"#,
        )
        .unwrap();
        merge(&file, &mut info, parsed).unwrap();
        assert!(info.animated);
        assert_eq!(info.frame_count, 5);
    }

    #[test]
    fn test_json_slice_skips_banner() {
        let output = "ffprobe banner line\n{\"streams\": []}";
        assert_eq!(json_slice(output), "{\"streams\": []}");
    }
}
