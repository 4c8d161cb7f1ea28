//! Video chunker server.
//!
//! Wires up:
//! - filesystem storage and the startup sweep of partial output
//! - the ffmpeg engine behind a bounded transcode worker pool
//! - the HTTP upload and playback surface

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use video_chunker::adapters::ffmpeg::FfmpegEngine;
use video_chunker::adapters::fs::StorageLayout;
use video_chunker::adapters::http::{self, AppState};
use video_chunker::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("video_chunker=info,tower_http=info")),
        )
        .init();

    // 1. Storage: clear whatever a previous process left half-written
    let layout = StorageLayout::new(&config.storage.root);
    layout
        .make_dir(layout.root())
        .await
        .with_context(|| format!("failed to create storage root {:?}", layout.root()))?;
    let swept = layout
        .sweep_partials()
        .await
        .context("failed to sweep partial output")?;
    if swept > 0 {
        tracing::info!(removed = swept, "removed partial output from a previous run");
    }

    // 2. Engine and worker pool
    let engine = Arc::new(FfmpegEngine::new(config.transcode.clone()));
    let state = AppState::build(&config, engine);
    let pool = state.pool.clone();

    // 3. HTTP
    let app = http::router(state);
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, storage = ?config.storage.root, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // 4. Drain: stop new jobs, let running transcodes finish or cancel them
    tracing::info!("http server stopped, draining transcodes");
    pool.shutdown(config.shutdown_grace()).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
