use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::application::{Artifact, ArtifactKind};
use crate::error::{Error, Result};

const SEGMENT_CACHE: &str = "public, max-age=31536000, immutable";
const MANIFEST_CACHE: &str = "no-cache";

pub async fn manifest(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    let artifact = state.playback.resolve(&id, None).await?;
    serve(artifact).await
}

pub async fn artifact(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response> {
    let artifact = state.playback.resolve(&id, Some(&name)).await?;
    serve(artifact).await
}

/// Stream a resolved file without buffering it in memory.
async fn serve(artifact: Artifact) -> Result<Response> {
    let file = match File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(format!("video {}", artifact.video_id)))
        }
        Err(e) => return Err(e.into()),
    };

    let cache = match artifact.kind {
        ArtifactKind::Manifest => MANIFEST_CACHE,
        ArtifactKind::Segment => SEGMENT_CACHE,
    };

    Response::builder()
        .header(CONTENT_TYPE, artifact.kind.content_type())
        .header(CONTENT_LENGTH, artifact.len)
        .header(CACHE_CONTROL, cache)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| Error::internal(e.to_string()))
}
