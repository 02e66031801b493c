//! # Job Events
//!
//! Progress notifications for validation jobs. Every event carries the full
//! counters of both tiers, so a client that misses some events still sees
//! the current state with the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::jobs::{JobStatus, TierProgress, ValidationJob};

/// Kind of job event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// Job accepted and Tier 2 dispatched
    Start,
    /// One citation settled in Tier 2
    Tier2Progress,
    /// Tier 2 finished for every citation
    Tier2Complete,
    /// One citation settled in Tier 3
    Tier3Progress,
    /// Result snapshot committed
    Complete,
    /// Job failed
    Error,
}

impl JobEventKind {
    /// Name used for the SSE `event:` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Tier2Progress => "tier2_progress",
            Self::Tier2Complete => "tier2_complete",
            Self::Tier3Progress => "tier3_progress",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Kind that best describes a job's current state, used to replay it to
    /// late subscribers
    pub fn for_state(job: &ValidationJob) -> Self {
        match job.status {
            JobStatus::Completed => Self::Complete,
            JobStatus::Failed => Self::Error,
            JobStatus::Queued => Self::Start,
            JobStatus::Running if job.tier3_progress.total > 0 => Self::Tier3Progress,
            JobStatus::Running => Self::Tier2Progress,
        }
    }
}

/// An event in a validation job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub id: String,
    pub job_id: String,
    pub check_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub status: JobStatus,
    pub tier2_progress: TierProgress,
    pub tier3_progress: TierProgress,
    /// Citation that just settled, for per-citation progress events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobEvent {
    /// Capture the job's counters at this instant
    pub fn from_job(kind: JobEventKind, job: &ValidationJob) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            check_id: job.check_id.clone(),
            timestamp: Utc::now(),
            kind,
            status: job.status,
            tier2_progress: job.tier2_progress,
            tier3_progress: job.tier3_progress,
            citation_id: None,
            result_snapshot_id: job.result_snapshot_id.clone(),
            message: job.error.clone(),
        }
    }

    pub fn with_citation(mut self, citation_id: &str) -> Self {
        self.citation_id = Some(citation_id.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether no further events follow this one
    pub fn is_final(&self) -> bool {
        matches!(self.kind, JobEventKind::Complete | JobEventKind::Error)
    }
}
