//! Video chunker: upload a video, have it transcoded into an HLS segment
//! set, stream it back.
//!
//! Hexagonal layout:
//! - domain/: identifiers, the job state machine, the HLS playlist model
//! - ports/: the transcode engine contract
//! - adapters/: filesystem storage, the ffmpeg engine, the axum HTTP surface
//! - application/: job registry, worker pool, ingestion and playback services
//! - config: startup configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use config::Config;
pub use error::{Error, Result};
