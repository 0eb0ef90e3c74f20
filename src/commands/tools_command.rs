//! The `tools` command: probe external tool availability.

use crate::Result;
use crate::config::ToolsConfig;
use crate::services::invoker::{ToolKind, availability};

/// Probe every tool the engine can use and print the results.
pub async fn execute() -> Result<()> {
    let tools = ToolsConfig::default();
    let kinds = [
        ToolKind::Ffprobe,
        ToolKind::Ffmpeg,
        ToolKind::Cjxl,
        ToolKind::Avifenc,
        ToolKind::Exiftool,
    ];

    println!("external tools:");
    for kind in kinds {
        let path = kind.resolve(&tools);
        let status = tokio::task::spawn_blocking(move || availability::check_tool(&path))
            .await
            .map_err(|e| crate::error::PixlyError::concurrency(e.to_string()))?;
        let state = if status.available { "ok" } else { "missing" };
        let version = status.version.unwrap_or_else(|| "-".to_string());
        let resolved = status
            .resolved_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<10} {:<8} {:<10} {}", kind.binary_name(), state, version, resolved);
    }
    println!();
    println!("exiftool is optional; all others are required for their modes.");
    Ok(())
}
