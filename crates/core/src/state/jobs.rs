//! # Validation Jobs
//!
//! One record per orchestration run over a document version. Jobs are only
//! mutated by the coordinator and become read-only once terminal; a new run
//! always gets a new job, so superseded runs stay queryable.

use super::db::CitecheckDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::swarm::consensus::Tier;
use crate::swarm::verdict::TokenUsage;

/// Overall job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-tier citation counters. `pending + processing + completed + failed`
/// always equals `total`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TierProgress {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl TierProgress {
    pub fn enqueue(total: usize) -> Self {
        Self {
            pending: total,
            total,
            ..Default::default()
        }
    }

    /// pending → processing
    pub fn start(&mut self) {
        if self.pending > 0 {
            self.pending -= 1;
            self.processing += 1;
        }
    }

    /// processing → completed
    pub fn complete(&mut self) {
        if self.processing > 0 {
            self.processing -= 1;
            self.completed += 1;
        }
    }

    /// processing → failed
    pub fn fail(&mut self) {
        if self.processing > 0 {
            self.processing -= 1;
            self.failed += 1;
        }
    }

    pub fn resolved(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_done(&self) -> bool {
        self.resolved() == self.total
    }
}

/// One validation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationJob {
    #[serde(rename = "jobId")]
    pub id: String,
    pub check_id: String,
    /// Snapshot the run validates
    pub snapshot_id: String,
    /// Snapshot the run produced
    #[serde(default)]
    pub result_snapshot_id: Option<String>,
    pub status: JobStatus,
    /// Tier currently being dispatched
    #[serde(default)]
    pub phase: Option<Tier>,
    pub tier2_progress: TierProgress,
    pub tier3_progress: TierProgress,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ValidationJob {
    pub fn new(check_id: &str, snapshot_id: &str, force: bool) -> Self {
        let now = Utc::now();
        Self {
            id: format!("job_{}", Uuid::new_v4().simple()),
            check_id: check_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
            result_snapshot_id: None,
            status: JobStatus::Queued,
            phase: None,
            tier2_progress: TierProgress::default(),
            tier3_progress: TierProgress::default(),
            force,
            usage: TokenUsage::default(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// queued → running(tier2)
    pub fn start(&mut self, tier2_total: usize) {
        if self.status != JobStatus::Queued {
            return;
        }
        self.status = JobStatus::Running;
        self.phase = Some(Tier::Tier2);
        self.tier2_progress = TierProgress::enqueue(tier2_total);
        self.touch();
    }

    /// running(tier2) → running(tier3)
    pub fn begin_tier3(&mut self, total: usize) {
        if self.status != JobStatus::Running {
            return;
        }
        self.phase = Some(Tier::Tier3);
        self.tier3_progress = TierProgress::enqueue(total);
        self.touch();
    }

    /// Returns false if the job was already terminal
    pub fn complete(&mut self, result_snapshot_id: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.phase = None;
        self.result_snapshot_id = Some(result_snapshot_id.to_string());
        self.touch();
        self.completed_at = Some(self.updated_at);
        true
    }

    /// Returns false if the job was already terminal
    pub fn fail(&mut self, error: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.phase = None;
        self.error = Some(error.to_string());
        self.touch();
        self.completed_at = Some(self.updated_at);
        true
    }

    /// Mutable progress of one tier
    pub fn progress_mut(&mut self, tier: Tier) -> &mut TierProgress {
        self.updated_at = Utc::now();
        match tier {
            Tier::Tier2 => &mut self.tier2_progress,
            Tier::Tier3 => &mut self.tier3_progress,
        }
    }
}

/// Job storage using SQLite. Each job is a row in `validation_jobs`.
pub struct JobManager {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl JobManager {
    pub fn new(db: &CitecheckDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Insert or replace a job
    pub fn save(&self, job: &ValidationJob) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data = serde_json::to_string(job)?;
        conn.execute(
            r#"
            INSERT INTO validation_jobs (id, check_id, snapshot_id, status, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                status = ?4,
                data = ?5,
                updated_at = ?7
            "#,
            params![
                job.id,
                job.check_id,
                job.snapshot_id,
                job.status.as_str(),
                data,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to save validation job")?;

        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<ValidationJob>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM validation_jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load validation job")?;

        data.map(|d| serde_json::from_str(&d).context("Corrupt validation job"))
            .transpose()
    }

    /// Jobs of a check, newest first
    pub fn list_for_check(&self, check_id: &str) -> Result<Vec<ValidationJob>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT data FROM validation_jobs WHERE check_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![check_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list validation jobs")?;

        rows.iter()
            .map(|d| serde_json::from_str(d).context("Corrupt validation job"))
            .collect()
    }

    pub fn latest_for_check(&self, check_id: &str) -> Result<Option<ValidationJob>> {
        Ok(self.list_for_check(check_id)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters_conserve_total() {
        let mut progress = TierProgress::enqueue(3);
        progress.start();
        progress.start();
        progress.complete();
        progress.fail();
        progress.start();

        assert_eq!(progress.pending, 0);
        assert_eq!(progress.processing, 1);
        assert_eq!(
            progress.pending + progress.processing + progress.completed + progress.failed,
            progress.total
        );
        assert!(!progress.is_done());

        progress.complete();
        assert!(progress.is_done());

        // Extra transitions never underflow
        progress.complete();
        progress.start();
        assert_eq!(progress.completed, 2);
    }

    #[test]
    fn test_job_lifecycle_and_terminal_freeze() {
        let mut job = ValidationJob::new("chk_1", "snap_1", false);
        assert_eq!(job.status, JobStatus::Queued);

        job.start(4);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.phase, Some(Tier::Tier2));
        assert_eq!(job.tier2_progress.pending, 4);

        job.begin_tier3(1);
        assert_eq!(job.phase, Some(Tier::Tier3));

        assert!(job.complete("snap_2"));
        assert!(job.is_terminal());
        assert!(!job.fail("late failure"));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_snapshot_id.as_deref(), Some("snap_2"));
    }

    #[test]
    fn test_api_shape_is_camel_case() {
        let job = ValidationJob::new("chk_1", "snap_1", true);
        let json = serde_json::to_value(&job).unwrap();

        assert!(json["jobId"].as_str().unwrap().starts_with("job_"));
        assert_eq!(json["checkId"], "chk_1");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["tier2Progress"]["total"], 0);
    }

    #[test]
    fn test_manager_roundtrip_and_history() {
        let db = CitecheckDb::open_in_memory().unwrap();
        let manager = JobManager::new(&db);

        let first = ValidationJob::new("chk_1", "snap_1", false);
        manager.save(&first).unwrap();

        let mut second = ValidationJob::new("chk_1", "snap_1", true);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        second.start(2);
        manager.save(&second).unwrap();
        second.fail("store down");
        manager.save(&second).unwrap();

        let loaded = manager.load(&second.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(manager.list_for_check("chk_1").unwrap().len(), 2);
        assert_eq!(manager.latest_for_check("chk_1").unwrap().unwrap().id, second.id);
        assert!(manager.load("job_missing").unwrap().is_none());
    }
}
