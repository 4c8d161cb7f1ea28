use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::multipart::MultipartRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::domain::{JobState, VideoId};
use crate::error::{Error, Result};

/// Multipart field carrying the video file.
pub const UPLOAD_FIELD: &str = "video";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    video_id: VideoId,
    status: JobState,
    bytes: u64,
    message: &'static str,
}

/// Accept one video, answering as soon as it is queued.
pub async fn upload_video(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut multipart = multipart.map_err(|e| Error::BadUpload(e.body_text()))?;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, state.ingest.max_upload_bytes()))?
            .ok_or_else(|| {
                Error::BadUpload(format!("missing file field {:?}", UPLOAD_FIELD))
            })?;
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let content_type = field.content_type().map(str::to_owned);
        let receipt = state.ingest.ingest(content_type.as_deref(), field).await?;

        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                video_id: receipt.video_id,
                status: receipt.status,
                bytes: receipt.bytes,
                message: "Video uploaded successfully and processing started",
            }),
        ));
    }
}

fn multipart_error(err: MultipartError, limit: u64) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::BadUpload(err.body_text())
    }
}
