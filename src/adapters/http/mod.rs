//! HTTP inbound adapter.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /video/upload`        multipart field `video`
//! - `GET  /jobs/:id`            job snapshot
//! - `GET  /video/:id`           manifest
//! - `GET  /video/:id/:name`     manifest or segment by name

mod error;
mod status;
mod stream;
mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::fs::StorageLayout;
use crate::application::{
    IngestService, JobRegistry, PlaybackService, TranscodeWorker, WorkerPool,
};
use crate::config::Config;
use crate::ports::TranscodeEngine;

pub use upload::UPLOAD_FIELD;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 1 << 20;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub playback: Arc<PlaybackService>,
    pub registry: Arc<JobRegistry>,
    pub pool: Arc<WorkerPool>,
}

impl AppState {
    /// Wire the services together and start the worker pool.
    /// Must be called from within a tokio runtime.
    pub fn build(config: &Config, engine: Arc<dyn TranscodeEngine>) -> Self {
        let layout = StorageLayout::new(&config.storage.root);
        let registry = Arc::new(JobRegistry::new());

        let worker = Arc::new(TranscodeWorker::new(
            registry.clone(),
            layout.clone(),
            engine,
        ));
        let pool = Arc::new(WorkerPool::start(
            worker,
            config.transcode.workers,
            config.transcode.queue_depth,
        ));

        Self {
            ingest: Arc::new(IngestService::new(
                layout.clone(),
                registry.clone(),
                pool.clone(),
                config.upload.max_bytes,
            )),
            playback: Arc::new(PlaybackService::new(layout, registry.clone())),
            registry,
            pool,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(
        state
            .ingest
            .max_upload_bytes()
            .saturating_add(MULTIPART_OVERHEAD),
    )
    .unwrap_or(usize::MAX);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(status::health))
        .route("/jobs/:id", get(status::job))
        .route(
            "/video/upload",
            post(upload::upload_video).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/video/:id", get(stream::manifest))
        .route("/video/:id/:name", get(stream::artifact))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
