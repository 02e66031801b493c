//! # Job Progress
//!
//! Live state of validation jobs. Each job has a tracker holding the current
//! record behind a `watch` channel and a `broadcast` channel of events. All
//! counter updates go through [`JobTracker::record`], which applies the
//! change and publishes the matching event under the same lock, so events
//! are seen in the order the counters moved.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};

use super::events::{JobEvent, JobEventKind};
use crate::state::jobs::{JobManager, ValidationJob};

const EVENT_BUFFER: usize = 256;

pub struct JobTracker {
    state: watch::Sender<ValidationJob>,
    events: broadcast::Sender<JobEvent>,
}

impl JobTracker {
    pub fn new(job: ValidationJob) -> Arc<Self> {
        let (state, _) = watch::channel(job);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self { state, events })
    }

    pub fn job_id(&self) -> String {
        self.state.borrow().id.clone()
    }

    /// Current record
    pub fn snapshot(&self) -> ValidationJob {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ValidationJob> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Apply `update` to the job and publish an event of `kind`. Returns the
    /// updated record. Terminal jobs are left untouched and publish nothing.
    pub fn record<F>(&self, kind: JobEventKind, citation_id: Option<&str>, update: F) -> ValidationJob
    where
        F: FnOnce(&mut ValidationJob),
    {
        let events = &self.events;
        self.state.send_modify(|job| {
            if job.is_terminal() {
                return;
            }
            update(job);
            let mut event = JobEvent::from_job(kind, job);
            if let Some(cid) = citation_id {
                event = event.with_citation(cid);
            }
            // No subscribers is fine
            let _ = events.send(event);
        });
        self.snapshot()
    }
}

/// All jobs known to this process, plus optional persistence
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobTracker>>>,
    manager: Option<JobManager>,
}

impl JobRegistry {
    pub fn new(manager: Option<JobManager>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            manager,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub async fn register(&self, job: ValidationJob) -> Result<Arc<JobTracker>> {
        self.persist(&job)?;
        let tracker = JobTracker::new(job);
        self.jobs
            .write()
            .await
            .insert(tracker.job_id(), tracker.clone());
        Ok(tracker)
    }

    /// Drop the live tracker of a finished job; reads fall back to the
    /// persisted record. Subscribers already attached still drain the
    /// buffered events. Without persistence the tracker is the only record,
    /// so it stays.
    pub async fn retire(&self, job_id: &str) {
        if self.manager.is_none() {
            return;
        }
        if self.jobs.write().await.remove(job_id).is_some() {
            tracing::debug!(job_id, "Job tracker retired");
        }
    }

    pub async fn tracker(&self, job_id: &str) -> Option<Arc<JobTracker>> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Live record if the job ran in this process, otherwise the persisted one
    pub async fn get(&self, job_id: &str) -> Result<Option<ValidationJob>> {
        if let Some(tracker) = self.tracker(job_id).await {
            return Ok(Some(tracker.snapshot()));
        }
        match &self.manager {
            Some(manager) => manager.load(job_id),
            None => Ok(None),
        }
    }

    /// Jobs of a check, newest first
    pub async fn for_check(&self, check_id: &str) -> Result<Vec<ValidationJob>> {
        let mut jobs: HashMap<String, ValidationJob> = match &self.manager {
            Some(manager) => manager
                .list_for_check(check_id)?
                .into_iter()
                .map(|j| (j.id.clone(), j))
                .collect(),
            None => HashMap::new(),
        };
        for tracker in self.jobs.read().await.values() {
            let job = tracker.snapshot();
            if job.check_id == check_id {
                jobs.insert(job.id.clone(), job);
            }
        }

        let mut jobs: Vec<_> = jobs.into_values().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    pub fn persist(&self, job: &ValidationJob) -> Result<()> {
        match &self.manager {
            Some(manager) => manager.save(job),
            None => Ok(()),
        }
    }
}
