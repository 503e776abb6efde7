//! Sync job state machine
//!
//! One job per source, owned exclusively by the orchestrator. The loop
//! states cycle `Fetching → Parsing → Ingesting → Checkpointing → Fetching`
//! until the source is exhausted; `Paused` can be entered from any loop
//! state and returns to it on resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Created, not yet running
    Queued,
    /// Requesting the next page from the source
    Fetching,
    /// Waiting out a source-imposed cooldown
    RateLimited,
    /// Parsing and normalizing the fetched page
    Parsing,
    /// Committing the batch to the canonical store
    Ingesting,
    /// Advancing the durable checkpoint
    Checkpointing,
    /// Suspended by the storage governor or an operator
    Paused,
    /// Source exhausted; terminal
    Completed,
    /// Consecutive-failure budget exhausted; terminal
    Failed,
    /// Cancelled at a suspension point; terminal
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Fetching => "FETCHING",
            JobState::RateLimited => "RATELIMITED",
            JobState::Parsing => "PARSING",
            JobState::Ingesting => "INGESTING",
            JobState::Checkpointing => "CHECKPOINTING",
            JobState::Paused => "PAUSED",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobState::Queued),
            "FETCHING" => Ok(JobState::Fetching),
            "RATELIMITED" => Ok(JobState::RateLimited),
            "PARSING" => Ok(JobState::Parsing),
            "INGESTING" => Ok(JobState::Ingesting),
            "CHECKPOINTING" => Ok(JobState::Checkpointing),
            "PAUSED" => Ok(JobState::Paused),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// One active synchronization run for a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: Uuid,
    pub source_id: String,
    pub state: JobState,
    /// State to return to when leaving Paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<JobState>,
    pub items_processed: u64,
    pub items_failed: u64,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            source_id: source_id.into(),
            state: JobState::Queued,
            resume_state: None,
            items_processed: 0,
            items_failed: 0,
            last_error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to a new state; terminal states stamp `ended_at`
    pub fn transition_to(&mut self, new_state: JobState) -> (JobState, JobState) {
        let old_state = self.state;
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        (old_state, new_state)
    }

    /// Enter Paused, remembering the state to return to
    pub fn pause(&mut self) {
        if self.state != JobState::Paused && !self.state.is_terminal() {
            self.resume_state = Some(self.state);
            self.transition_to(JobState::Paused);
        }
    }

    /// Leave Paused, restoring the remembered state
    pub fn resume(&mut self) {
        if self.state == JobState::Paused {
            let target = self.resume_state.take().unwrap_or(JobState::Fetching);
            self.transition_to(target);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_stamp_end_time() {
        let mut job = SyncJob::new("trial-registry");
        assert!(job.ended_at.is_none());

        job.transition_to(JobState::Fetching);
        assert!(job.ended_at.is_none());

        job.transition_to(JobState::Completed);
        assert!(job.ended_at.is_some());
        assert!(job.is_terminal());
    }

    #[test]
    fn test_pause_returns_to_prior_state() {
        let mut job = SyncJob::new("bibliographic");
        job.transition_to(JobState::Ingesting);

        job.pause();
        assert_eq!(job.state, JobState::Paused);

        job.resume();
        assert_eq!(job.state, JobState::Ingesting);
        assert!(job.resume_state.is_none());
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut job = SyncJob::new("code-set");
        job.transition_to(JobState::Parsing);

        job.pause();
        job.pause();
        job.resume();
        // Double pause must not overwrite the remembered state with Paused
        assert_eq!(job.state, JobState::Parsing);
    }

    #[test]
    fn test_pause_ignored_in_terminal_state() {
        let mut job = SyncJob::new("topic-corpus");
        job.transition_to(JobState::Completed);
        job.pause();
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            JobState::Queued,
            JobState::Fetching,
            JobState::RateLimited,
            JobState::Parsing,
            JobState::Ingesting,
            JobState::Checkpointing,
            JobState::Paused,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            let parsed: JobState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }
}
