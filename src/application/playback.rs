//! Streaming Handler: maps a playback request onto a published file.
//!
//! Readiness comes from the job state first and the filesystem second, so
//! a segment directory that is still being written is never exposed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::adapters::fs::StorageLayout;
use crate::application::registry::JobRegistry;
use crate::domain::{JobState, VideoId};
use crate::error::{Error, Result};
use crate::ports::engine::MANIFEST_FILE;

/// URL prefix under which manifests and segments are served.
pub const PLAYBACK_BASE: &str = "/video";

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Manifest,
    Segment,
}

impl ArtifactKind {
    fn of(name: &str) -> Option<Self> {
        if name == MANIFEST_FILE {
            return Some(ArtifactKind::Manifest);
        }
        match Path::new(name).extension().and_then(|ext| ext.to_str()) {
            Some("ts") => Some(ArtifactKind::Segment),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Manifest => MANIFEST_CONTENT_TYPE,
            ArtifactKind::Segment => SEGMENT_CONTENT_TYPE,
        }
    }
}

/// A file that may be streamed to the client as-is.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub video_id: VideoId,
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub len: u64,
}

pub struct PlaybackService {
    layout: StorageLayout,
    registry: Arc<JobRegistry>,
}

impl PlaybackService {
    pub fn new(layout: StorageLayout, registry: Arc<JobRegistry>) -> Self {
        Self { layout, registry }
    }

    /// Resolve the manifest (`name == None`) or one named artifact of a video.
    pub async fn resolve(&self, raw_id: &str, name: Option<&str>) -> Result<Artifact> {
        let video_id = VideoId::parse(raw_id)?;

        // Reject hostile names before revealing anything about the video.
        let (path, kind) = match name {
            None => (self.layout.manifest_path(&video_id), ArtifactKind::Manifest),
            Some(name) => {
                let path = self.layout.resolve_segment_file(&video_id, name)?;
                let kind = ArtifactKind::of(name).ok_or_else(|| {
                    Error::not_found(format!("{} for video {}", name, video_id))
                })?;
                (path, kind)
            }
        };

        match self.registry.get(&video_id).map(|job| job.state) {
            Some(JobState::Queued | JobState::Processing) => {
                return Err(Error::NotReady(video_id.to_string()))
            }
            Some(JobState::Failed) => return Err(Error::Gone(video_id.to_string())),
            // Without an entry only a previously published set can exist.
            Some(JobState::Completed) | None => {}
        }

        let len = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(Error::not_found(match name {
                    Some(name) => format!("{} for video {}", name, video_id),
                    None => format!("video {}", video_id),
                }))
            }
        };

        Ok(Artifact {
            video_id,
            path,
            kind,
            len,
        })
    }
}
