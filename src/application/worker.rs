//! Transcode Worker Pool.
//!
//! A fixed number of worker tasks share one bounded queue. A worker owns a
//! job from the moment its `Queued -> Processing` claim succeeds until it
//! records the terminal state, so at most `size` jobs are ever processing.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::fs::{resolve_in, StorageLayout};
use crate::application::playback::PLAYBACK_BASE;
use crate::application::registry::JobRegistry;
use crate::domain::hls::MediaPlaylist;
use crate::domain::{JobState, TranscodeJob, VideoId};
use crate::error::{Error, Result};
use crate::ports::engine::{EngineError, EngineRequest, TranscodeEngine, MANIFEST_FILE};

type JobQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<TranscodeJob>>>;

/// Why a job ended `Failed`; the display text is what gets recorded.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("invalid transcoder output: {0}")]
    Output(String),
    #[error(transparent)]
    Storage(#[from] Error),
}

impl From<std::io::Error> for JobFailure {
    fn from(err: std::io::Error) -> Self {
        JobFailure::Storage(Error::Io(err))
    }
}

/// Executes one job at a time on behalf of the pool.
pub struct TranscodeWorker {
    registry: Arc<JobRegistry>,
    layout: StorageLayout,
    engine: Arc<dyn TranscodeEngine>,
}

impl TranscodeWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        layout: StorageLayout,
        engine: Arc<dyn TranscodeEngine>,
    ) -> Self {
        Self {
            registry,
            layout,
            engine,
        }
    }

    async fn run_worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        queue: JobQueue,
        stop: CancellationToken,
        cancel: CancellationToken,
    ) {
        tracing::debug!(worker = worker_id, "transcode worker started");
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                job = async { queue.lock().await.recv().await } => job,
            };
            let Some(job) = next else { break };
            self.process_job(worker_id, job, cancel.child_token()).await;
        }
        tracing::debug!(worker = worker_id, "transcode worker stopped");
    }

    /// Claim, run and settle one job. Never returns an error: every outcome
    /// is recorded on the job itself.
    pub async fn process_job(&self, worker_id: usize, job: TranscodeJob, cancel: CancellationToken) {
        let video_id = job.video_id.clone();
        if let Err(e) = self.registry.transition(&video_id, JobState::Processing, None) {
            tracing::warn!(worker = worker_id, video_id = %video_id, error = %e, "skipping job that could not be claimed");
            return;
        }
        tracing::info!(worker = worker_id, video_id = %video_id, "transcode started");

        let outcome = self.transcode(&job, cancel).await;

        let settled = match outcome {
            Ok(()) => self.registry.transition(&video_id, JobState::Completed, None),
            Err(failure) => {
                tracing::warn!(worker = worker_id, video_id = %video_id, error = %failure, "transcode failed");
                if let Err(e) = self.layout.remove_staging(&video_id).await {
                    tracing::error!(video_id = %video_id, error = %e, "failed to remove partial output");
                }
                self.registry
                    .transition(&video_id, JobState::Failed, Some(failure.to_string()))
            }
        };
        if let Err(e) = settled {
            tracing::error!(worker = worker_id, video_id = %video_id, error = %e, "failed to settle job");
        }
    }

    async fn transcode(
        &self,
        job: &TranscodeJob,
        cancel: CancellationToken,
    ) -> std::result::Result<(), JobFailure> {
        let staging = self.layout.prepare_staging(&job.video_id).await?;
        let request = EngineRequest {
            video_id: job.video_id.clone(),
            source: job.source_path.clone(),
            output_dir: staging.clone(),
        };

        self.engine.transcode(&request, cancel).await?;
        self.publish(&job.video_id, &staging).await
    }

    /// Verify the engine's output, then make it visible in one rename.
    async fn publish(&self, video_id: &VideoId, staging: &Path) -> std::result::Result<(), JobFailure> {
        let manifest_path = staging.join(MANIFEST_FILE);
        let text = match fs::read_to_string(&manifest_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JobFailure::Output("no manifest was produced".into()))
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Err(JobFailure::Output("manifest is empty".into()));
        }

        let mut playlist = MediaPlaylist::parse(&text)
            .map_err(|e| JobFailure::Output(format!("unreadable manifest: {}", e)))?;

        for segment in &playlist.segments {
            let path = resolve_in(staging, &segment.uri).map_err(|_| {
                JobFailure::Output(format!(
                    "manifest references {:?} outside the output directory",
                    segment.uri
                ))
            })?;
            match fs::metadata(&path).await {
                Ok(meta) if meta.len() > 0 => {}
                _ => {
                    return Err(JobFailure::Output(format!(
                        "segment {} is missing or empty",
                        segment.uri
                    )))
                }
            }
        }

        playlist.rebase(&format!("{}/{}/", PLAYBACK_BASE, video_id));
        playlist.playlist_type = Some(String::from("VOD"));
        playlist.end_list = true;
        playlist.write_to(&manifest_path).await?;

        self.layout.promote(video_id).await?;
        tracing::debug!(video_id = %video_id, segments = playlist.segments.len(), "segment set published");
        Ok(())
    }
}

/// A claimed place in the transcode queue.
pub struct SubmitSlot<'a> {
    permit: mpsc::Permit<'a, TranscodeJob>,
}

impl SubmitSlot<'_> {
    /// Hand the job to the pool. Never waits.
    pub fn submit(self, job: TranscodeJob) {
        self.permit.send(job);
    }
}

/// Bounded pool of transcode workers.
pub struct WorkerPool {
    sender: mpsc::Sender<TranscodeJob>,
    stop: CancellationToken,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers behind a queue holding at most `queue_depth`
    /// waiting jobs.
    pub fn start(worker: Arc<TranscodeWorker>, size: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(receiver));
        let stop = CancellationToken::new();
        let cancel = CancellationToken::new();

        let workers = (0..size.max(1))
            .map(|id| {
                tokio::spawn(worker.clone().run_worker_loop(
                    id,
                    queue.clone(),
                    stop.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        tracing::info!(workers = size, queue_depth, "transcode pool started");

        Self {
            sender,
            stop,
            cancel,
            workers: Mutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Claim a queue slot without blocking, failing with `Overloaded` when
    /// the queue is full.
    pub fn reserve(&self) -> Result<SubmitSlot<'_>> {
        if self.stop.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        match self.sender.try_reserve() {
            Ok(permit) => Ok(SubmitSlot { permit }),
            Err(TrySendError::Full(())) => Err(Error::Overloaded),
            Err(TrySendError::Closed(())) => Err(Error::ShuttingDown),
        }
    }

    /// Enqueue a `Queued` job; the transcode runs asynchronously.
    pub fn submit(&self, job: TranscodeJob) -> Result<()> {
        if job.state != JobState::Queued {
            return Err(Error::IllegalTransition {
                video_id: job.video_id.to_string(),
                from: job.state,
                to: JobState::Processing,
            });
        }
        self.reserve()?.submit(job);
        Ok(())
    }

    /// Stop taking work, give running transcodes `grace` to finish, then
    /// cancel whatever is still running and wait for the workers to exit.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));

        let pending = self.queued();
        if pending > 0 {
            tracing::warn!(pending, "shutting down with queued jobs that never started");
        }

        let all = futures::future::join_all(handles);
        tokio::pin!(all);
        if tokio::time::timeout(grace, all.as_mut()).await.is_err() {
            tracing::warn!(grace_secs = grace.as_secs(), "grace period elapsed, cancelling running transcodes");
            self.cancel.cancel();
            all.await;
        }
        tracing::info!("transcode pool stopped");
    }
}
