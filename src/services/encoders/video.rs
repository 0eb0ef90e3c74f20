//! Media-processor argument construction for repackaging and pre-decoding.

use std::path::Path;

/// QuickTime repackage: stream copy with the fast-start flag.
pub fn mov_repackage_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Fully decode a still source to PNG so picky encoders can ingest it.
pub fn decode_to_png_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Extract only the first frame of an animation to PNG.
pub fn first_frame_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-frames:v".to_string(),
        "1".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}
