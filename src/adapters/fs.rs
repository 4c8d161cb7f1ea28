//! Storage Layout Manager on the local filesystem.
//!
//! ```text
//! <root>/<video id>/source            uploaded bytes (written as source.part first)
//! <root>/<video id>/.chunks.partial/  engine output while a transcode runs
//! <root>/<video id>/chunks/           published manifest + segments
//! ```

use axum::{body::Bytes, BoxError};
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;

use crate::domain::VideoId;
use crate::error::{Error, Result};
use crate::ports::engine::MANIFEST_FILE;

const SOURCE_FILE: &str = "source";
const SOURCE_PART: &str = "source.part";
const CHUNKS_DIR: &str = "chunks";
const STAGING_DIR: &str = ".chunks.partial";

/// The uploaded bytes of one video, read-only once persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAsset {
    #[serde(skip)]
    pub path: PathBuf,
    pub content_type: String,
    pub bytes: u64,
}

/// Deterministic mapping from a [`VideoId`] to its on-disk locations.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_dir(&self, id: &VideoId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn source_path(&self, id: &VideoId) -> PathBuf {
        self.video_dir(id).join(SOURCE_FILE)
    }

    pub fn segment_dir(&self, id: &VideoId) -> PathBuf {
        self.video_dir(id).join(CHUNKS_DIR)
    }

    /// Where the engine writes; never visible to playback.
    pub fn staging_dir(&self, id: &VideoId) -> PathBuf {
        self.video_dir(id).join(STAGING_DIR)
    }

    pub fn manifest_path(&self, id: &VideoId) -> PathBuf {
        self.segment_dir(id).join(MANIFEST_FILE)
    }

    /// Resolve an artifact name from a request inside the video's segment
    /// directory. No filesystem access happens here.
    pub fn resolve_segment_file(&self, id: &VideoId, requested: &str) -> Result<PathBuf> {
        resolve_in(&self.segment_dir(id), requested)
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    pub async fn make_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    /// Stream an upload into `<video>/source`, refusing more than `max_bytes`.
    ///
    /// The file only appears under its final name once completely written.
    pub async fn persist_source<S, E>(
        &self,
        id: &VideoId,
        content_type: &str,
        stream: S,
        max_bytes: u64,
    ) -> Result<SourceAsset>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let dir = self.video_dir(id);
        self.make_dir(&dir).await?;
        let part = dir.join(SOURCE_PART);

        let copied = async {
            let body_with_io_error =
                stream.map_err(|err| io::Error::new(io::ErrorKind::Other, StreamFailure(err.into())));
            let body_reader = StreamReader::new(body_with_io_error);
            futures::pin_mut!(body_reader);
            let mut limited = body_reader.take(max_bytes + 1);

            let mut file = BufWriter::new(File::create(&part).await?);
            let written = tokio::io::copy(&mut limited, &mut file).await?;
            file.flush().await?;

            Ok::<_, io::Error>(written)
        }
        .await;

        let written = match copied {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&part).await;
                return Err(
                    match err.get_ref().and_then(|e| e.downcast_ref::<StreamFailure>()) {
                        Some(failure) => Error::BadUpload(failure.to_string()),
                        None => Error::Io(err),
                    },
                );
            }
        };

        if written > max_bytes {
            let _ = fs::remove_file(&part).await;
            return Err(Error::PayloadTooLarge { limit: max_bytes });
        }
        if written == 0 {
            let _ = fs::remove_file(&part).await;
            return Err(Error::BadUpload("uploaded file is empty".into()));
        }

        let path = self.source_path(id);
        fs::rename(&part, &path).await?;

        Ok(SourceAsset {
            path,
            content_type: content_type.to_owned(),
            bytes: written,
        })
    }

    /// Remove everything stored for a video. Used when ingestion fails
    /// before a job exists.
    pub async fn discard_video(&self, id: &VideoId) {
        let dir = self.video_dir(id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(video_id = %id, error = %e, "failed to discard video directory");
            }
        }
    }

    /// Fresh, empty staging directory for an engine run.
    pub async fn prepare_staging(&self, id: &VideoId) -> Result<PathBuf> {
        self.remove_staging(id).await?;
        let staging = self.staging_dir(id);
        self.make_dir(&staging).await?;
        Ok(staging)
    }

    pub async fn remove_staging(&self, id: &VideoId) -> Result<()> {
        match fs::remove_dir_all(self.staging_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically publish the staging directory as the segment set.
    pub async fn promote(&self, id: &VideoId) -> Result<()> {
        let target = self.segment_dir(id);
        if self.exists(&target).await {
            fs::remove_dir_all(&target).await?;
        }
        fs::rename(self.staging_dir(id), &target).await?;
        Ok(())
    }

    /// Remove staging output and half-written uploads left by a previous
    /// process. Returns how many leftovers were removed.
    pub async fn sweep_partials(&self) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| VideoId::parse(n).ok()) else {
                continue;
            };

            let staging = self.staging_dir(&id);
            if self.exists(&staging).await {
                fs::remove_dir_all(&staging).await?;
                removed += 1;
            }
            let part = self.video_dir(&id).join(SOURCE_PART);
            if self.exists(&part).await {
                fs::remove_file(&part).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Join `requested` onto `dir`, accepting only a single plain file name.
pub fn resolve_in(dir: &Path, requested: &str) -> Result<PathBuf> {
    let reject = || Error::PathTraversalRejected(requested.to_owned());

    if requested.is_empty()
        || requested.len() > 255
        || requested.starts_with('.')
        || requested.contains(['/', '\\', '\0'])
    {
        return Err(reject());
    }

    let mut components = Path::new(requested).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == requested => {}
        _ => return Err(reject()),
    }

    let resolved = dir.join(requested);
    if resolved.parent() != Some(dir) {
        return Err(reject());
    }
    Ok(resolved)
}

/// Marks io errors that came from the upload stream rather than the disk.
#[derive(Debug)]
struct StreamFailure(BoxError);

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StreamFailure {}
