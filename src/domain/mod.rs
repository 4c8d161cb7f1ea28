//! Domain layer - Pure business logic.

pub mod hls;
pub mod jobs;
pub mod video_id;

pub use jobs::{JobState, TranscodeJob};
pub use video_id::VideoId;
