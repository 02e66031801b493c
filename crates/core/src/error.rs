//! # Error Taxonomy
//!
//! Errors that cross component seams. Agent and quorum failures are contained
//! at the citation level and end up as data on the consensus record; only
//! `CheckError` is ever returned to callers of the coordinator.

use thiserror::Error;

use crate::state::snapshots::StoreError;
use crate::tools::reconciler::ReconcileError;

/// A single scoring agent failed to produce a usable verdict.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    /// The agent did not answer within the configured timeout
    #[error("agent {agent_id} timed out after {timeout_secs}s")]
    Timeout { agent_id: String, timeout_secs: u64 },

    /// The call itself failed (provider error, network, missing API key)
    #[error("agent {agent_id} call failed: {reason}")]
    Call { agent_id: String, reason: String },

    /// The agent answered, but the answer is unusable
    #[error("agent {agent_id} returned malformed output: {reason}")]
    MalformedOutput { agent_id: String, reason: String },
}

impl AgentError {
    pub fn agent_id(&self) -> &str {
        match self {
            AgentError::Timeout { agent_id, .. }
            | AgentError::Call { agent_id, .. }
            | AgentError::MalformedOutput { agent_id, .. } => agent_id,
        }
    }
}

/// Too few agents succeeded to trust a computed consensus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("quorum not met: {successful} successful verdicts, {required} required")]
pub struct QuorumError {
    pub successful: usize,
    pub required: usize,
}

/// Errors surfaced by coordinator operations.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Malformed paragraph or citation data. Rejected, never retried.
    #[error("invalid input: {0}")]
    Input(String),

    /// The check, snapshot, paragraph or citation does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The request conflicts with the current document state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Snapshot store or job bookkeeping unavailable. Fails the whole run.
    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),
}

impl From<StoreError> for CheckError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CheckNotFound(id) => CheckError::NotFound(format!("check {}", id)),
            StoreError::SnapshotNotFound(id) => CheckError::NotFound(format!("snapshot {}", id)),
            StoreError::StaleParent { check_id, .. } => CheckError::Conflict(format!(
                "check {} was changed by another writer, retry the request",
                check_id
            )),
            StoreError::Unavailable(e) => CheckError::Infrastructure(format!("{:#}", e)),
        }
    }
}

impl From<ReconcileError> for CheckError {
    fn from(err: ReconcileError) -> Self {
        CheckError::Input(err.to_string())
    }
}

pub type CheckResult<T> = Result<T, CheckError>;
