//! Job state machine and progress record.

use crate::{EntityTypeId, JobId, PrimitiveError, ReindexAction};
use reindex_shared::ErrorEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a scheduled job: `PENDING -> RUNNING -> {SUCCESS, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Scheduled, no action applied yet.
    Pending,
    /// At least one action started.
    Running,
    /// Every action applied.
    Success,
    /// An action failed; terminal until explicitly rescheduled.
    Failed,
}

impl JobState {
    /// Stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a stored name.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        match input {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(PrimitiveError::UnknownVariant {
                field: "state",
                input: other.to_owned(),
            }),
        }
    }

    /// Returns true for `SUCCESS` and `FAILED`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns true when the state machine allows `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Success | Self::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure context kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Entity type whose action failed.
    pub entity_type_id: EntityTypeId,
    /// The failed action.
    pub action: ReindexAction,
    /// Cause.
    pub error: ErrorEnvelope,
}

/// Progress of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Job identifier.
    pub job_id: JobId,
    /// Current state.
    pub state: JobState,
    /// Number of actions in the job.
    pub total: u64,
    /// Actions finished (applied, skipped or cancelled).
    pub done: u64,
    /// Epoch millis when the first action started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    /// Epoch millis when the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    /// Failure details when `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl JobProgress {
    /// Progress for a freshly scheduled job.
    #[must_use]
    pub const fn pending(job_id: JobId, total: u64) -> Self {
        Self {
            job_id,
            state: JobState::Pending,
            total,
            done: 0,
            started_at_ms: None,
            ended_at_ms: None,
            failure: None,
        }
    }

    fn transition(&mut self, next: JobState) -> Result<(), PrimitiveError> {
        if !self.state.can_transition_to(next) {
            return Err(PrimitiveError::InvalidJobTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// `PENDING -> RUNNING`; a no-op when already running.
    pub fn start(&mut self, now_ms: u64) -> Result<(), PrimitiveError> {
        if self.state == JobState::Running {
            return Ok(());
        }
        self.transition(JobState::Running)?;
        self.started_at_ms = Some(now_ms);
        Ok(())
    }

    /// Count one finished action.
    pub const fn advance(&mut self) {
        if self.done < self.total {
            self.done += 1;
        }
    }

    /// `RUNNING -> SUCCESS`.
    pub fn succeed(&mut self, now_ms: u64) -> Result<(), PrimitiveError> {
        self.transition(JobState::Success)?;
        self.done = self.total;
        self.ended_at_ms = Some(now_ms);
        Ok(())
    }

    /// `PENDING | RUNNING -> FAILED`.
    pub fn fail(&mut self, now_ms: u64, failure: JobFailure) -> Result<(), PrimitiveError> {
        self.transition(JobState::Failed)?;
        self.ended_at_ms = Some(now_ms);
        self.failure = Some(failure);
        Ok(())
    }

    /// Time spent running, up to `now_ms` while still running.
    #[must_use]
    pub fn running_time_ms(&self, now_ms: u64) -> Option<u64> {
        let started = self.started_at_ms?;
        let end = self.ended_at_ms.unwrap_or(now_ms);
        Some(end.saturating_sub(started))
    }
}
