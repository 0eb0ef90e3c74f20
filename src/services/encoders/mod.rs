//! Concrete encoder invocations.
//!
//! Each function builds the argument list for one recipe and runs it
//! through the shared [`ToolInvoker`]. Argument construction is split into
//! per-tool submodules so it stays testable without the binaries installed.

pub mod avif;
pub mod jxl;
pub mod video;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::ToolsConfig;
use crate::core::strategy::Effort;
use crate::services::invoker::{ToolInvoker, ToolKind};

/// Executes encode recipes against the resolved tool binaries.
pub struct Encoders {
    invoker: Arc<ToolInvoker>,
    cjxl: PathBuf,
    avifenc: PathBuf,
    ffmpeg: PathBuf,
}

impl Encoders {
    /// Resolve the binaries from configuration.
    pub fn new(invoker: Arc<ToolInvoker>, tools: &ToolsConfig) -> Self {
        Self {
            invoker,
            cjxl: ToolKind::Cjxl.resolve(tools),
            avifenc: ToolKind::Avifenc.resolve(tools),
            ffmpeg: ToolKind::Ffmpeg.resolve(tools),
        }
    }

    /// Mathematically lossless JXL encode.
    pub async fn jxl_lossless(
        &self,
        input: &Path,
        output: &Path,
        effort: Effort,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = jxl::lossless_args(input, output, effort);
        self.invoker.invoke(&self.cjxl, &args, cancel).await?;
        Ok(())
    }

    /// JPEG bitstream recompression into JXL (bit-identical pixels).
    pub async fn jxl_from_jpeg(
        &self,
        input: &Path,
        output: &Path,
        effort: Effort,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = jxl::jpeg_recompress_args(input, output, effort);
        self.invoker.invoke(&self.cjxl, &args, cancel).await?;
        Ok(())
    }

    /// Lossless AVIF for a still image.
    pub async fn avif_lossless_still(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = avif::lossless_still_args(input, output);
        self.invoker.invoke(&self.avifenc, &args, cancel).await?;
        Ok(())
    }

    /// Lossy AVIF for a still image at one quality level.
    pub async fn avif_quality_still(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = avif::quality_still_args(input, output, quality);
        self.invoker.invoke(&self.avifenc, &args, cancel).await?;
        Ok(())
    }

    /// Animated AVIF; `quality` of `None` is lossless.
    pub async fn avif_animated(
        &self,
        input: &Path,
        output: &Path,
        quality: Option<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = avif::animated_args(input, output, quality);
        self.invoker.invoke(&self.ffmpeg, &args, cancel).await?;
        Ok(())
    }

    /// QuickTime repackage by stream copy.
    pub async fn mov_repackage(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = video::mov_repackage_args(input, output);
        self.invoker.invoke(&self.ffmpeg, &args, cancel).await?;
        Ok(())
    }

    /// Decode a source the target encoder cannot ingest into a temp PNG.
    pub async fn decode_to_png(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = video::decode_to_png_args(input, output);
        self.invoker.invoke(&self.ffmpeg, &args, cancel).await?;
        Ok(())
    }

    /// Extract an animation's first frame into a temp PNG.
    pub async fn extract_first_frame(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = video::first_frame_args(input, output);
        self.invoker.invoke(&self.ffmpeg, &args, cancel).await?;
        Ok(())
    }
}
