//! Second phase of classification: targeted deep probing.
//!
//! Consumes the scanner's candidate list, probes every file whose suspicion
//! score reached the threshold, and partitions the result into files ready
//! for the strategy engine and corrupted files for the problem-file policy.
//!
//! Probing is concurrent, bounded by the invoker's process semaphore, and
//! each probe carries its own 30 second budget; a failure or timeout flags
//! the file as corrupted.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::media::MediaFile;
use crate::core::probe::Prober;
use crate::core::scanner::ScannedFile;

/// Per-probe budget, independent of the invoker's own invocation timeout.
const PROBE_BUDGET: Duration = Duration::from_secs(30);

/// Video codecs that cannot be stream-copied into a QuickTime container.
const MOV_INCOMPATIBLE_CODECS: &[&str] = &["vp8", "vp9", "av1"];

/// Containers whose payload never survives a QuickTime repackage.
const MOV_INCOMPATIBLE_CONTAINERS: &[&str] = &["asf", "flv"];

/// Output of classification.
#[derive(Debug, Default)]
pub struct Classified {
    /// Files with a defined kind, ready for the strategy engine.
    pub ready: Vec<ScannedFile>,
    /// Files flagged corrupted; routed to the corrupted-file policy.
    pub corrupted: Vec<MediaFile>,
    /// How many deep probes actually ran.
    pub probed: u64,
}

/// Deep-probe classifier.
pub struct Classifier {
    prober: Arc<Prober>,
    concurrency: usize,
}

impl Classifier {
    /// Create a classifier probing through `prober` with the given
    /// concurrent probe budget.
    pub fn new(prober: Arc<Prober>, concurrency: usize) -> Self {
        Self {
            prober,
            concurrency: concurrency.max(1),
        }
    }

    /// Probe suspicious candidates and partition the list.
    pub async fn classify(
        &self,
        candidates: Vec<ScannedFile>,
        cancel: &CancellationToken,
    ) -> Classified {
        let mut classified = Classified::default();
        let mut to_probe = Vec::new();

        for mut scanned in candidates {
            // A zero-byte file cannot hold any media payload.
            if scanned.file.size == 0 {
                scanned.file.corrupted = true;
                classified.corrupted.push(scanned.file);
                continue;
            }
            if scanned.needs_probe {
                to_probe.push(scanned);
            } else {
                classified.ready.push(scanned);
            }
        }

        if to_probe.is_empty() {
            return classified;
        }
        info!("classifier: deep-probing {} suspicious files", to_probe.len());

        let probed = stream::iter(to_probe)
            .map(|scanned| self.probe_one(scanned, cancel))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for mut scanned in probed {
            classified.probed += 1;
            if scanned.file.corrupted {
                classified.corrupted.push(scanned.file);
            } else {
                mark_compatibility(&mut scanned);
                classified.ready.push(scanned);
            }
        }
        classified
    }

    async fn probe_one(&self, mut scanned: ScannedFile, cancel: &CancellationToken) -> ScannedFile {
        let result = tokio::time::timeout(
            PROBE_BUDGET,
            self.prober
                .probe(&scanned.file, &mut scanned.info, cancel),
        )
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    "classifier: probe failed for {}: {}",
                    scanned.file.path.display(),
                    err
                );
                scanned.file.corrupted = true;
            }
            Err(_) => {
                warn!(
                    "classifier: probe timed out for {}",
                    scanned.file.path.display()
                );
                scanned.file.corrupted = true;
            }
        }
        scanned
    }
}

/// Set the late-bound compatibility flags from probe results.
fn mark_compatibility(scanned: &mut ScannedFile) {
    let codec = scanned.info.codec.to_lowercase();
    if MOV_INCOMPATIBLE_CODECS.contains(&codec.as_str()) {
        scanned.file.codec_incompatible = true;
    }
    let container = scanned.info.container.to_lowercase();
    if MOV_INCOMPATIBLE_CONTAINERS
        .iter()
        .any(|c| container.split(',').any(|part| part == *c))
    {
        scanned.file.container_incompatible = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    use crate::core::media::{MediaInfo, MediaKind};

    fn scanned(path: &str, size: u64, needs_probe: bool) -> ScannedFile {
        let file = MediaFile {
            path: PathBuf::from(path),
            base_name: path.rsplit('/').next().unwrap().to_string(),
            size,
            extension: ".mp4".to_string(),
            modified: UNIX_EPOCH,
            kind: MediaKind::Video,
            corrupted: false,
            codec_incompatible: false,
            container_incompatible: false,
        };
        ScannedFile {
            info: MediaInfo {
                identity_key: file.identity_key(),
                ..MediaInfo::default()
            },
            file,
            needs_probe,
        }
    }

    #[test]
    fn test_mark_compatibility_flags_vp9() {
        let mut s = scanned("/v/clip.mp4", 100, false);
        s.info.codec = "vp9".to_string();
        mark_compatibility(&mut s);
        assert!(s.file.codec_incompatible);
        assert!(!s.file.container_incompatible);
    }

    #[test]
    fn test_mark_compatibility_flags_asf_container() {
        let mut s = scanned("/v/old.wmv", 100, false);
        s.info.codec = "wmv2".to_string();
        s.info.container = "asf".to_string();
        mark_compatibility(&mut s);
        assert!(s.file.container_incompatible);
    }

    #[test]
    fn test_h264_is_compatible() {
        let mut s = scanned("/v/clip.mp4", 100, false);
        s.info.codec = "h264".to_string();
        s.info.container = "mov,mp4,m4a,3gp,3g2,mj2".to_string();
        mark_compatibility(&mut s);
        assert!(!s.file.codec_incompatible);
        assert!(!s.file.container_incompatible);
    }

    #[tokio::test]
    async fn test_zero_byte_goes_straight_to_corrupted() {
        use crate::config::{SecurityConfig, ToolsConfig};
        use crate::services::invoker::ToolInvoker;

        let invoker = Arc::new(ToolInvoker::new(
            &SecurityConfig::default(),
            std::path::Path::new("/tmp"),
        ));
        let prober = Arc::new(Prober::new(invoker, &ToolsConfig::default()));
        let classifier = Classifier::new(prober, 2);

        let candidates = vec![scanned("/v/empty.mp4", 0, true), scanned("/v/ok.mp4", 10, false)];
        let cancel = CancellationToken::new();
        let classified = classifier.classify(candidates, &cancel).await;

        assert_eq!(classified.corrupted.len(), 1);
        assert!(classified.corrupted[0].corrupted);
        assert_eq!(classified.ready.len(), 1);
        // No probe ran: the zero-byte rule and the trusted file bypass it.
        assert_eq!(classified.probed, 0);
    }
}
