use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use super::video_id::VideoId;
use crate::error::Error;

/// Lifecycle of a transcode: `Queued -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_advance_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversion task, from a persisted source asset to a segment directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub video_id: VideoId,
    #[serde(skip)]
    pub source_path: PathBuf,
    #[serde(skip)]
    pub output_dir: PathBuf,
    pub state: JobState,
    /// Human-readable failure cause, set only in `Failed`.
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TranscodeJob {
    pub fn new(video_id: VideoId, source_path: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            video_id,
            source_path,
            output_dir,
            state: JobState::Queued,
            error: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply one lifecycle transition. Illegal transitions leave the job untouched.
    pub fn advance(&mut self, next: JobState, error: Option<String>) -> Result<(), Error> {
        if !self.state.can_advance_to(next) {
            return Err(Error::IllegalTransition {
                video_id: self.video_id.to_string(),
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobState::Processing => self.started_at = Some(now),
            JobState::Completed => self.finished_at = Some(now),
            JobState::Failed => {
                self.finished_at = Some(now);
                self.error = Some(
                    error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| String::from("unspecified failure")),
                );
            }
            JobState::Queued => unreachable!("no transition leads back to queued"),
        }
        self.state = next;
        Ok(())
    }

    /// Wall-clock time spent processing, once the job is terminal.
    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
