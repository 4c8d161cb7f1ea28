//! Job Registry: the single source of truth for whether a video is queued,
//! processing, ready or failed.
//!
//! Each entry is a `watch` channel. Readers take a short-lived snapshot, the
//! owning worker mutates through the sender, and anyone can subscribe to
//! await a terminal state. The surrounding `DashMap` only locks one shard
//! per insert, so registrations of distinct videos proceed in parallel.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;
use tokio::sync::watch;

use crate::domain::{JobState, TranscodeJob, VideoId};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<VideoId, watch::Sender<TranscodeJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `Queued` job. Fails with `AlreadyExists` if the id is known,
    /// whatever state its job is in.
    pub fn register(
        &self,
        video_id: VideoId,
        source_path: PathBuf,
        output_dir: PathBuf,
    ) -> Result<TranscodeJob> {
        match self.jobs.entry(video_id) {
            Entry::Occupied(entry) => Err(Error::AlreadyExists(entry.key().to_string())),
            Entry::Vacant(entry) => {
                let job = TranscodeJob::new(entry.key().clone(), source_path, output_dir);
                let (sender, _) = watch::channel(job.clone());
                entry.insert(sender);
                tracing::debug!(video_id = %job.video_id, "job registered");
                Ok(job)
            }
        }
    }

    /// Snapshot of the job for `video_id`.
    pub fn get(&self, video_id: &VideoId) -> Option<TranscodeJob> {
        self.jobs
            .get(video_id)
            .map(|sender| sender.borrow().clone())
    }

    /// Apply a lifecycle transition on behalf of the job's owning worker.
    ///
    /// The legality check and the mutation happen under the entry's own
    /// lock, so two racing callers can never both leave `Queued`.
    pub fn transition(
        &self,
        video_id: &VideoId,
        next: JobState,
        error: Option<String>,
    ) -> Result<TranscodeJob> {
        let entry = self
            .jobs
            .get(video_id)
            .ok_or_else(|| Error::not_found(format!("no job for video {}", video_id)))?;

        let mut outcome = Err(Error::internal("transition not applied"));
        entry.value().send_if_modified(|job| match job.advance(next, error) {
            Ok(()) => {
                outcome = Ok(job.clone());
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        drop(entry);

        match &outcome {
            Ok(job) => tracing::info!(
                video_id = %video_id,
                state = %job.state,
                elapsed_ms = job.elapsed_ms(),
                error = job.error.as_deref(),
                "job transitioned"
            ),
            Err(e) => tracing::error!(video_id = %video_id, error = %e, "rejected job transition"),
        }
        outcome
    }

    /// Resolve once the job reaches `Completed` or `Failed`.
    /// Returns `None` for unknown ids.
    pub async fn wait_for_terminal(&self, video_id: &VideoId) -> Option<TranscodeJob> {
        let mut receiver = self.jobs.get(video_id)?.subscribe();
        // The sender lives in the map for the registry's lifetime.
        let job = receiver
            .wait_for(|job| job.state.is_terminal())
            .await
            .ok()?
            .clone();
        Some(job)
    }

    /// Number of jobs currently in `state`.
    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs
            .iter()
            .filter(|entry| entry.value().borrow().state == state)
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn register(registry: &JobRegistry, id: &VideoId) -> Result<TranscodeJob> {
        registry.register(
            id.clone(),
            PathBuf::from("/data/source"),
            PathBuf::from("/data/chunks"),
        )
    }

    #[test]
    fn register_then_get() {
        let registry = JobRegistry::new();
        let id = VideoId::mint();
        let job = register(&registry, &id).unwrap();
        assert_eq!(job.state, JobState::Queued);

        let seen = registry.get(&id).unwrap();
        assert_eq!(seen.video_id, id);
        assert_eq!(seen.state, JobState::Queued);
        assert!(registry.get(&VideoId::mint()).is_none());
    }

    #[test]
    fn duplicate_registration_fails_in_any_state() {
        let registry = JobRegistry::new();
        let id = VideoId::mint();
        register(&registry, &id).unwrap();
        assert!(matches!(register(&registry, &id), Err(Error::AlreadyExists(_))));

        registry.transition(&id, JobState::Processing, None).unwrap();
        registry
            .transition(&id, JobState::Failed, Some("boom".into()))
            .unwrap();
        assert!(matches!(register(&registry, &id), Err(Error::AlreadyExists(_))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_registration_has_one_winner() {
        let registry = Arc::new(JobRegistry::new());
        let id = VideoId::mint();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move { register(&registry, &id) })
            })
            .collect();

        let mut ok = 0;
        let mut exists = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::AlreadyExists(_)) => exists += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((ok, exists), (1, 7));
    }

    #[tokio::test]
    async fn only_one_claim_of_a_queued_job_succeeds() {
        let registry = Arc::new(JobRegistry::new());
        let id = VideoId::mint();
        register(&registry, &id).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move { registry.transition(&id, JobState::Processing, None) })
            })
            .collect();

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[test]
    fn illegal_transition_leaves_entry_untouched() {
        let registry = JobRegistry::new();
        let id = VideoId::mint();
        register(&registry, &id).unwrap();

        let err = registry.transition(&id, JobState::Completed, None).unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert_eq!(registry.get(&id).unwrap().state, JobState::Queued);
    }

    #[test]
    fn transition_of_unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry
            .transition(&VideoId::mint(), JobState::Processing, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn observers_see_monotonic_states() {
        let registry = Arc::new(JobRegistry::new());
        let id = VideoId::mint();
        register(&registry, &id).unwrap();

        let observer = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut seen = vec![];
                loop {
                    let state = registry.get(&id).unwrap().state;
                    if seen.last() != Some(&state) {
                        seen.push(state);
                    }
                    if state.is_terminal() {
                        return seen;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.transition(&id, JobState::Processing, None).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.transition(&id, JobState::Completed, None).unwrap();

        let seen = observer.await.unwrap();
        let lifecycle = [JobState::Queued, JobState::Processing, JobState::Completed];
        let mut expected = lifecycle.iter();
        for state in &seen {
            assert!(
                expected.any(|s| s == state),
                "{seen:?} is not a subsequence of the lifecycle"
            );
        }
        assert_eq!(seen.last(), Some(&JobState::Completed));
    }

    #[tokio::test]
    async fn wait_for_terminal_resolves_on_failure() {
        let registry = Arc::new(JobRegistry::new());
        let id = VideoId::mint();
        register(&registry, &id).unwrap();

        let waiter = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.wait_for_terminal(&id).await })
        };

        registry.transition(&id, JobState::Processing, None).unwrap();
        registry
            .transition(&id, JobState::Failed, Some("exit status: 1".into()))
            .unwrap();

        let job = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("exit status: 1"));
        assert!(registry.wait_for_terminal(&VideoId::mint()).await.is_none());
    }

    #[test]
    fn counts_by_state() {
        let registry = JobRegistry::new();
        let a = VideoId::mint();
        let b = VideoId::mint();
        register(&registry, &a).unwrap();
        register(&registry, &b).unwrap();
        registry.transition(&a, JobState::Processing, None).unwrap();

        assert_eq!(registry.count_in(JobState::Queued), 1);
        assert_eq!(registry.count_in(JobState::Processing), 1);
        assert_eq!(registry.count_in(JobState::Completed), 0);
    }
}
