//! Ingestion Handler: turns one uploaded file into a queued transcode.

use axum::{body::Bytes, BoxError};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::fs::StorageLayout;
use crate::application::registry::JobRegistry;
use crate::application::worker::WorkerPool;
use crate::domain::{JobState, VideoId};
use crate::error::{Error, Result};

/// What the uploader gets back once the job is queued.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub video_id: VideoId,
    pub status: JobState,
    pub bytes: u64,
}

pub struct IngestService {
    layout: StorageLayout,
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    max_upload_bytes: u64,
}

impl IngestService {
    pub fn new(
        layout: StorageLayout,
        registry: Arc<JobRegistry>,
        pool: Arc<WorkerPool>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            layout,
            registry,
            pool,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Validate, persist and enqueue one upload.
    ///
    /// A queue slot is claimed before any byte hits the disk, and whatever
    /// was written is removed again if a later step fails.
    pub async fn ingest<S, E>(&self, content_type: Option<&str>, stream: S) -> Result<IngestReceipt>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let content_type = video_content_type(content_type)?;
        let slot = self.pool.reserve()?;

        let video_id = VideoId::mint();
        let asset = match self
            .layout
            .persist_source(&video_id, &content_type, stream, self.max_upload_bytes)
            .await
        {
            Ok(asset) => asset,
            Err(e) => {
                self.layout.discard_video(&video_id).await;
                return Err(e);
            }
        };

        let job = match self.registry.register(
            video_id.clone(),
            asset.path.clone(),
            self.layout.segment_dir(&video_id),
        ) {
            Ok(job) => job,
            Err(Error::AlreadyExists(id)) => {
                // Ids are freshly minted, so a collision means the registry is broken.
                self.layout.discard_video(&video_id).await;
                return Err(Error::internal(format!("minted id {} was already registered", id)));
            }
            Err(e) => {
                self.layout.discard_video(&video_id).await;
                return Err(e);
            }
        };

        slot.submit(job);
        tracing::info!(
            video_id = %video_id,
            bytes = asset.bytes,
            content_type = %asset.content_type,
            "upload accepted"
        );

        Ok(IngestReceipt {
            video_id,
            status: JobState::Queued,
            bytes: asset.bytes,
        })
    }
}

/// Normalised media type, accepted only when it names a video format.
fn video_content_type(declared: Option<&str>) -> Result<String> {
    let declared = declared
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::UnsupportedMediaType(String::from("missing content type")))?;

    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.strip_prefix("video/") {
        Some(subtype) if !subtype.is_empty() => Ok(essence),
        _ => Err(Error::UnsupportedMediaType(declared.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::TranscodeWorker;
    use crate::ports::engine::MockTranscodeEngine;
    use bytes::Bytes;
    use std::io;
    use std::time::Duration;

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> {
        futures::stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    struct Fixture {
        dir: tempfile::TempDir,
        registry: Arc<JobRegistry>,
        pool: Arc<WorkerPool>,
        service: IngestService,
    }

    /// One worker whose engine exits cleanly without writing any output.
    fn fixture(queue_depth: usize, max_bytes: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let registry = Arc::new(JobRegistry::new());
        let mut engine = MockTranscodeEngine::new();
        engine.expect_transcode().returning(|_, _| Ok(()));
        let worker = Arc::new(TranscodeWorker::new(
            registry.clone(),
            layout.clone(),
            Arc::new(engine),
        ));
        let pool = Arc::new(WorkerPool::start(worker, 1, queue_depth));
        let service = IngestService::new(layout, registry.clone(), pool.clone(), max_bytes);
        Fixture {
            dir,
            registry,
            pool,
            service,
        }
    }

    fn stored_videos(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn content_type_must_be_video() {
        assert_eq!(video_content_type(Some("video/mp4")).unwrap(), "video/mp4");
        assert_eq!(
            video_content_type(Some("Video/QuickTime; codecs=avc1")).unwrap(),
            "video/quicktime"
        );
        for bad in [None, Some(""), Some("audio/mpeg"), Some("video/"), Some("text/plain")] {
            assert!(matches!(
                video_content_type(bad),
                Err(Error::UnsupportedMediaType(_))
            ));
        }
    }

    #[tokio::test]
    async fn accepted_upload_is_persisted_and_registered() {
        let f = fixture(4, 1024);
        let receipt = f
            .service
            .ingest(Some("video/mp4"), body(&[b"fake ", b"mp4 bytes"]))
            .await
            .unwrap();

        assert_eq!(receipt.status, JobState::Queued);
        assert_eq!(receipt.bytes, 14);
        let source = f.dir.path().join(receipt.video_id.as_str()).join("source");
        assert_eq!(std::fs::read(source).unwrap(), b"fake mp4 bytes");
        assert!(f.registry.get(&receipt.video_id).is_some());

        let job = tokio::time::timeout(
            Duration::from_secs(5),
            f.registry.wait_for_terminal(&receipt.video_id),
        )
        .await
        .unwrap()
        .unwrap();
        // The mock engine writes nothing, so verification fails the job.
        assert_eq!(job.state, JobState::Failed);
        f.pool.shutdown(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn each_upload_gets_a_fresh_id() {
        let f = fixture(4, 1024);
        let a = f.service.ingest(Some("video/mp4"), body(&[b"a"])).await.unwrap();
        let b = f.service.ingest(Some("video/mp4"), body(&[b"b"])).await.unwrap();
        assert_ne!(a.video_id, b.video_id);
        f.pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn wrong_media_type_writes_nothing() {
        let f = fixture(4, 1024);
        let err = f
            .service
            .ingest(Some("image/png"), body(&[b"png"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(_)));
        assert_eq!(stored_videos(&f.dir), 0);
        assert!(f.registry.is_empty());
        f.pool.shutdown(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn oversized_upload_is_discarded() {
        let f = fixture(4, 8);
        let err = f
            .service
            .ingest(Some("video/mp4"), body(&[b"0123456", b"789"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 8 }));
        assert_eq!(stored_videos(&f.dir), 0);
        assert!(f.registry.is_empty());
        f.pool.shutdown(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn broken_stream_is_a_bad_upload() {
        let f = fixture(4, 1024);
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = f
            .service
            .ingest(Some("video/mp4"), stream)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadUpload(_)));
        assert_eq!(stored_videos(&f.dir), 0);
        f.pool.shutdown(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn shutting_down_pool_refuses_uploads() {
        let f = fixture(4, 1024);
        f.pool.shutdown(Duration::ZERO).await;
        let err = f
            .service
            .ingest(Some("video/mp4"), body(&[b"late"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
        assert_eq!(stored_videos(&f.dir), 0);
    }
}
