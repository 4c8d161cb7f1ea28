//! Error taxonomy shared by the ingestion and playback pipeline.
//!
//! Each variant maps onto one HTTP status through [`Error::http_status`];
//! the axum adapter turns that into a JSON body.

use crate::domain::jobs::JobState;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A video identifier did not match the identifier grammar.
    #[error("invalid video identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A requested artifact name would leave the video's segment directory.
    #[error("rejected artifact name: {0:?}")]
    PathTraversalRejected(String),

    /// The uploaded file exceeded the configured size bound.
    #[error("upload exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// The declared content type is not a video media type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The multipart upload could not be parsed.
    #[error("bad upload: {0}")]
    BadUpload(String),

    /// Unknown video or missing artifact.
    #[error("not found: {0}")]
    NotFound(String),

    /// The video exists but its segment set is not published yet.
    #[error("video {0} is still being processed")]
    NotReady(String),

    /// The video's transcode failed; nothing will ever be served for it.
    #[error("video {0} failed to transcode")]
    Gone(String),

    /// A job is already registered for this identifier.
    #[error("a job already exists for video {0}")]
    AlreadyExists(String),

    /// A state machine transition that the job lifecycle does not allow.
    #[error("illegal transition for video {video_id}: {from} -> {to}")]
    IllegalTransition {
        video_id: String,
        from: JobState,
        to: JobState,
    },

    /// The transcode queue is full.
    #[error("transcode queue is full, try again later")]
    Overloaded,

    /// The worker pool no longer accepts submissions.
    #[error("server is shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code this error should be surfaced as.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidIdentifier(_) | Error::PathTraversalRejected(_) | Error::BadUpload(_) => {
                400
            }
            Error::NotFound(_) => 404,
            Error::NotReady(_) => 409,
            Error::Gone(_) => 410,
            Error::PayloadTooLarge { .. } => 413,
            Error::UnsupportedMediaType(_) => 415,
            Error::Overloaded | Error::ShuttingDown => 503,
            Error::AlreadyExists(_)
            | Error::IllegalTransition { .. }
            | Error::Io(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::PathTraversalRejected(_) => "path_traversal_rejected",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::UnsupportedMediaType(_) => "unsupported_media_type",
            Error::BadUpload(_) => "bad_upload",
            Error::NotFound(_) => "not_found",
            Error::NotReady(_) => "not_ready",
            Error::Gone(_) => "gone",
            Error::AlreadyExists(_) => "already_exists",
            Error::IllegalTransition { .. } => "illegal_transition",
            Error::Overloaded => "overloaded",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
