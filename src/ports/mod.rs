//! Ports - Trait seams between the pipeline and its collaborators.

pub mod engine;

pub use engine::{EngineError, EngineRequest, TranscodeEngine};
