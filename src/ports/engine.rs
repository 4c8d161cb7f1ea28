use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::domain::VideoId;

/// Manifest file the engine must leave in its output directory.
pub const MANIFEST_FILE: &str = "playlist.m3u8";

/// Naming template for the sequentially numbered media segments.
pub const SEGMENT_TEMPLATE: &str = "chunk_%03d.ts";

/// One engine invocation: read `source`, write a manifest plus segments
/// into `output_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub video_id: VideoId,
    pub source: PathBuf,
    pub output_dir: PathBuf,
}

impl EngineRequest {
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to launch transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Non-zero exit; `diagnostic` is the engine's stderr, verbatim.
    #[error("transcoder exited with {status}: {diagnostic}")]
    Exited { status: String, diagnostic: String },

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("transcoder io error: {0}")]
    Io(#[from] std::io::Error),
}

/// External transcoding engine contract.
///
/// A successful return only means the engine exited cleanly; the caller
/// still verifies the manifest and segments before publishing them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Run to completion, or until `cancel` fires. Cancellation must stop
    /// the underlying process before returning [`EngineError::Cancelled`].
    async fn transcode(
        &self,
        request: &EngineRequest,
        cancel: CancellationToken,
    ) -> Result<(), EngineError>;
}
