//! Application services wiring the domain to the storage and engine adapters.

pub mod ingest;
pub mod playback;
pub mod registry;
pub mod worker;

pub use ingest::{IngestReceipt, IngestService};
pub use playback::{Artifact, ArtifactKind, PlaybackService};
pub use registry::JobRegistry;
pub use worker::{SubmitSlot, TranscodeWorker, WorkerPool};
