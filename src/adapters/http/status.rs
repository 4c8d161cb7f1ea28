use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::domain::{TranscodeJob, VideoId};
use crate::error::{Error, Result};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": true }))
}

/// Snapshot of a video's transcode job, for clients polling until `completed`.
pub async fn job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TranscodeJob>> {
    let video_id = VideoId::parse(&id)?;
    state
        .registry
        .get(&video_id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("no job for video {}", video_id)))
}
