//! Tool availability probing with a process-wide memoized cache.
//!
//! Availability is checked by attempting `-version`, `--version`, and a bare
//! invocation in that order. Results are cached for the lifetime of the
//! process so repeated runs (resume, per-file retries) never re-probe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Probed status of one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    /// The binary that was probed (explicit path or PATH lookup result).
    pub resolved_path: Option<PathBuf>,
    /// Whether any probe invocation succeeded.
    pub available: bool,
    /// First version-looking token from the probe output, if any.
    pub version: Option<String>,
}

static AVAILABILITY_CACHE: Lazy<Mutex<HashMap<String, ToolStatus>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\d+(?:\.\d+)?").expect("static version pattern"));

/// Probe a tool by explicit path or bare name, consulting the cache first.
pub fn check_tool(tool: &Path) -> ToolStatus {
    let key = tool.to_string_lossy().into_owned();
    if let Some(status) = AVAILABILITY_CACHE.lock().unwrap().get(&key) {
        return status.clone();
    }

    let status = probe(tool);
    AVAILABILITY_CACHE
        .lock()
        .unwrap()
        .insert(key, status.clone());
    status
}

/// Drop every memoized probe result.
pub fn clear_cache() {
    AVAILABILITY_CACHE.lock().unwrap().clear();
}

fn probe(tool: &Path) -> ToolStatus {
    let resolved = if tool.components().count() > 1 {
        tool.is_file().then(|| tool.to_path_buf())
    } else {
        which::which(tool).ok()
    };
    let Some(resolved_path) = resolved else {
        debug!("tool probe: {} not found", tool.display());
        return ToolStatus {
            resolved_path: None,
            available: false,
            version: None,
        };
    };

    for args in [&["-version"][..], &["--version"][..], &[][..]] {
        let output = Command::new(&resolved_path).args(args).output();
        match output {
            Ok(output) if output.status.success() => {
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                let version = VERSION_PATTERN
                    .find(&combined)
                    .map(|m| m.as_str().to_string());
                return ToolStatus {
                    resolved_path: Some(resolved_path),
                    available: true,
                    version,
                };
            }
            Ok(_) => continue,
            Err(err) => {
                debug!("tool probe: {} failed to spawn: {}", tool.display(), err);
                return ToolStatus {
                    resolved_path: Some(resolved_path),
                    available: false,
                    version: None,
                };
            }
        }
    }

    ToolStatus {
        resolved_path: Some(resolved_path),
        available: false,
        version: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_unavailable() {
        let status = check_tool(Path::new("definitely-not-a-real-binary-xyz"));
        assert!(!status.available);
        assert!(status.resolved_path.is_none());
    }

    #[test]
    fn test_probe_results_are_cached() {
        let tool = Path::new("another-missing-binary-abc");
        let first = check_tool(tool);
        let second = check_tool(tool);
        assert_eq!(first.available, second.available);
        assert!(
            AVAILABILITY_CACHE
                .lock()
                .unwrap()
                .contains_key("another-missing-binary-abc")
        );
    }

    #[test]
    fn test_version_pattern_extracts_semver() {
        let m = VERSION_PATTERN.find("ffprobe version 6.1.1-3ubuntu5").unwrap();
        assert_eq!(m.as_str(), "6.1.1");
        let m = VERSION_PATTERN.find("cjxl v0.10").unwrap();
        assert_eq!(m.as_str(), "0.10");
    }
}
