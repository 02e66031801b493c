//! # Validation Coordinator
//!
//! Entry point for every operation on a check: intake, citation
//! identification, paragraph edits, batch validation jobs, single-citation
//! reprocessing and manual review. Every change lands as a new snapshot.
//!
//! A batch job runs Tier 2 for all of its citations concurrently under a
//! semaphore, waits for all of them, then runs Tier 3 for the triggered
//! subset under the same bound. Results are merged onto whatever snapshot is
//! current when the run finishes, so an edit that landed mid-run survives.
//!
//! Every read-modify-commit on a check holds that check's write lock, so two
//! writers never build on the same parent. Agent calls run outside the lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;

use crate::error::{CheckError, CheckResult};
use crate::models::{LlmProvider, ModelConfig};
use crate::state::db::CitecheckDb;
use crate::state::document::{Citation, DocumentStructure, ManualReview};
use crate::state::jobs::{JobManager, ValidationJob};
use crate::state::snapshots::{
    CheckRecord, DocumentSnapshot, SnapshotDraft, SnapshotReason, SnapshotStore, SnapshotSummary,
    SqliteSnapshotStore,
};
use crate::state::summary::CheckSummary;
use crate::swarm::consensus::{ConsensusCalculator, ConsensusPolicy, RiskLevel, Tier};
use crate::tools::reconciler::ParagraphReconciler;

use super::agents::build_panels;
use super::events::JobEventKind;
use super::panel::PanelEvaluator;
use super::pipeline::CitationStage;
use super::progress::{JobRegistry, JobTracker};
use super::validator::TierValidator;
use super::verdict::{OutputSchema, TokenUsage};

/// Configuration for validation runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Global LLM provider (default: Anthropic)
    pub global_provider: LlmProvider,
    /// Global model for all agents
    pub global_model: Option<String>,
    /// Base URL override for LLM API (for OpenAI-compatible endpoints)
    pub base_url: Option<String>,
    /// Per-agent model overrides (agent_id -> model name)
    pub per_agent_models: HashMap<String, String>,
    /// Per-agent provider overrides (agent_id -> provider)
    pub per_agent_providers: HashMap<String, LlmProvider>,
    /// Per-agent base URL overrides (agent_id -> base_url, for OpenAI)
    pub per_agent_base_urls: HashMap<String, String>,
    /// Tier-2 panel seats
    pub tier2_agents: Vec<String>,
    /// Schema the Tier-2 panel answers in
    pub tier2_schema: OutputSchema,
    /// Tier-3 investigator seats
    pub tier3_agents: Vec<String>,
    /// Citations validated at once within a job
    pub max_concurrent_citations: usize,
    pub agent_timeout_secs: u64,
    /// Investigators browse case law, so they get longer
    pub tier3_timeout_secs: u64,
    pub min_quorum: usize,
    /// Score standard deviation above which a panel counts as split
    pub dispersion_threshold: f64,
    /// Neighbouring paragraphs included on each side of a citation
    pub context_radius: usize,
    pub context_max_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let policy = ConsensusPolicy::default();
        Self {
            global_provider: LlmProvider::Anthropic,
            global_model: None,
            base_url: None,
            per_agent_models: HashMap::new(),
            per_agent_providers: HashMap::new(),
            per_agent_base_urls: HashMap::new(),
            tier2_agents: (1..=5).map(|i| format!("panelist_{}", i)).collect(),
            tier2_schema: OutputSchema::Score,
            tier3_agents: (1..=3).map(|i| format!("investigator_{}", i)).collect(),
            max_concurrent_citations: 4,
            agent_timeout_secs: 60,
            tier3_timeout_secs: 180,
            min_quorum: policy.min_quorum,
            dispersion_threshold: policy.dispersion_threshold,
            context_radius: 1,
            context_max_chars: 4_000,
        }
    }
}

impl ValidationConfig {
    /// Model config for one seat: per-agent override, then global, then the
    /// provider default
    pub fn model_config_for(&self, agent_id: &str) -> ModelConfig {
        let provider = self
            .per_agent_providers
            .get(agent_id)
            .copied()
            .unwrap_or(self.global_provider);

        let model = self
            .per_agent_models
            .get(agent_id)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        // Only OpenAI-compatible providers honour a base URL
        let base_url = if provider.supports_base_url() {
            self.per_agent_base_urls
                .get(agent_id)
                .or(self.base_url.as_ref())
                .cloned()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }

    pub fn consensus_policy(&self) -> ConsensusPolicy {
        ConsensusPolicy {
            min_quorum: self.min_quorum,
            dispersion_threshold: self.dispersion_threshold,
        }
    }
}

/// Result of a paragraph edit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    /// Latest snapshot after the edit (validated when validation succeeded)
    pub snapshot: DocumentSnapshot,
    /// Snapshot holding the reconciled paragraph before validation
    pub edited_snapshot_id: Option<String>,
    pub new_citations: Vec<String>,
    pub modified_citations: Vec<String>,
    pub removed_citations: Vec<String>,
    pub unchanged: bool,
    /// Set when the edit was saved but validating its new citations was not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

/// A reviewer's decision on one citation
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewDecision {
    pub status: RiskLevel,
    #[serde(default)]
    pub note: Option<String>,
    pub reviewer: String,
}

/// Copy validation results onto `document` for citations whose id and text
/// are unchanged there. Manual reviews always come from `document`. Returns
/// the ids that no longer match.
fn merge_validations(document: &mut DocumentStructure, results: &[Citation]) -> Vec<String> {
    let mut stale = Vec::new();
    for result in results {
        match document.citation_mut(&result.id) {
            Some(target) if target.text == result.text => {
                let manual = target.validation.manual_review.take();
                target.validation = result.validation.clone();
                target.validation.manual_review = manual;
            }
            _ => stale.push(result.id.clone()),
        }
    }
    stale
}

/// Citations a non-forced run picks up: never validated, interrupted before
/// Tier 3, or whose panel missed quorum last time
fn needs_run(citation: &Citation) -> bool {
    let stage = citation.validation.stage;
    !stage.is_settled() || stage == CitationStage::Tier2Failed
}

fn infrastructure(err: anyhow::Error) -> CheckError {
    CheckError::Infrastructure(format!("{:#}", err))
}

/// The validation coordinator
pub struct ValidationCoordinator {
    config: ValidationConfig,
    store: Arc<dyn SnapshotStore>,
    jobs: Arc<JobRegistry>,
    validator: TierValidator,
    reconciler: ParagraphReconciler,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ValidationCoordinator {
    pub fn new(
        config: ValidationConfig,
        store: Arc<dyn SnapshotStore>,
        jobs: Arc<JobRegistry>,
        tier2: PanelEvaluator,
        tier3: PanelEvaluator,
    ) -> Self {
        let calculator = ConsensusCalculator::new(config.consensus_policy());
        Self {
            validator: TierValidator::new(tier2, tier3, calculator),
            reconciler: ParagraphReconciler::new(),
            write_locks: Mutex::new(HashMap::new()),
            config,
            store,
            jobs,
        }
    }

    /// SQLite-backed coordinator with LLM panels
    pub fn from_config(config: ValidationConfig, db: &CitecheckDb) -> Self {
        let (tier2, tier3) = build_panels(&config, Some(db));
        tracing::info!(
            tier2 = ?tier2.agent_ids(),
            tier3 = ?tier3.agent_ids(),
            "Panels configured"
        );
        Self::new(
            config,
            Arc::new(SqliteSnapshotStore::new(db)),
            Arc::new(JobRegistry::new(Some(JobManager::new(db)))),
            tier2,
            tier3,
        )
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    fn persist_job(&self, job: &ValidationJob) {
        if let Err(e) = self.jobs.persist(job) {
            tracing::warn!(job_id = %job.id, "Failed to persist job: {:#}", e);
        }
    }

    /// Exclusive right to commit on `check_id` until the guard drops
    async fn lock_check(&self, check_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .lock()
            .await
            .entry(check_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    fn context_for(&self, document: &DocumentStructure, citation_id: &str) -> String {
        document
            .context_window(
                citation_id,
                self.config.context_radius,
                self.config.context_max_chars,
            )
            .unwrap_or_default()
    }

    // === Checks and snapshots ===

    /// Start a lineage from already-structured paragraph text
    #[tracing::instrument(skip(self, paragraphs), fields(paragraphs = paragraphs.len()))]
    pub async fn create_check(&self, title: &str, paragraphs: &[String]) -> CheckResult<DocumentSnapshot> {
        if title.trim().is_empty() {
            return Err(CheckError::Input("title must not be empty".to_string()));
        }
        if paragraphs.is_empty() {
            return Err(CheckError::Input("document has no paragraphs".to_string()));
        }
        let document =
            DocumentStructure::from_plain_paragraphs(title, paragraphs).map_err(CheckError::Input)?;
        Ok(self.store.create_check(document).await?)
    }

    pub async fn check(&self, check_id: &str) -> CheckResult<CheckRecord> {
        Ok(self.store.check(check_id).await?)
    }

    pub async fn list_checks(&self) -> CheckResult<Vec<CheckRecord>> {
        Ok(self.store.list_checks().await?)
    }

    pub async fn current(&self, check_id: &str) -> CheckResult<DocumentSnapshot> {
        Ok(self.store.current(check_id).await?)
    }

    pub async fn snapshot(&self, snapshot_id: &str) -> CheckResult<DocumentSnapshot> {
        Ok(self.store.load(snapshot_id).await?)
    }

    pub async fn history(&self, check_id: &str) -> CheckResult<Vec<SnapshotSummary>> {
        Ok(self.store.history(check_id).await?)
    }

    pub async fn summary(&self, check_id: &str) -> CheckResult<CheckSummary> {
        let current = self.store.current(check_id).await?;
        Ok(CheckSummary::from_snapshot(&current))
    }

    // === Identification and edits ===

    /// Run the identifier over every paragraph of the current snapshot.
    /// Known citations keep their ids; new ones are numbered from the
    /// lineage counter.
    #[tracing::instrument(skip(self))]
    pub async fn identify_citations(&self, check_id: &str) -> CheckResult<DocumentSnapshot> {
        let _guard = self.lock_check(check_id).await;
        let current = self.store.current(check_id).await?;
        let mut document = current.document.clone();

        let mut added = 0usize;
        for paragraph in current.document.paragraphs.iter() {
            let outcome = self
                .reconciler
                .refresh(paragraph, &document.citations, document.next_seq())?;
            added += outcome.new_citation_ids.len();
            document.apply_reconciliation(&outcome);
        }
        document.check_integrity().map_err(CheckError::Input)?;

        let draft = SnapshotDraft::new(&current, SnapshotReason::CitationsIdentified, document)
            .with_description(format!("{} new citations identified", added));
        let snapshot = self.store.commit(check_id, draft).await?;

        tracing::info!(
            snapshot_id = %snapshot.id,
            citations = snapshot.document.citations.len(),
            new = added,
            "Citations identified"
        );
        Ok(snapshot)
    }

    /// Replace one paragraph's text, reconcile its citations, and validate
    /// the new and modified ones. The reconciled paragraph is saved before
    /// validation starts; a validation failure leaves that snapshot current.
    #[tracing::instrument(skip(self, text))]
    pub async fn edit_paragraph(
        &self,
        check_id: &str,
        paragraph_id: &str,
        text: &str,
    ) -> CheckResult<EditOutcome> {
        let guard = self.lock_check(check_id).await;
        let current = self.store.current(check_id).await?;
        let paragraph = current
            .document
            .paragraph(paragraph_id)
            .ok_or_else(|| CheckError::NotFound(format!("paragraph {}", paragraph_id)))?;

        let outcome = self.reconciler.reconcile(
            paragraph,
            &current.document.citations,
            text,
            current.document.next_seq(),
        )?;
        if outcome.unchanged {
            return Ok(EditOutcome {
                snapshot: current,
                edited_snapshot_id: None,
                new_citations: Vec::new(),
                modified_citations: Vec::new(),
                removed_citations: Vec::new(),
                unchanged: true,
                validation_error: None,
            });
        }

        let mut document = current.document.clone();
        document.apply_reconciliation(&outcome);
        document.check_integrity().map_err(CheckError::Input)?;

        let draft = SnapshotDraft::new(&current, SnapshotReason::ParagraphEdited, document)
            .with_description(format!(
                "{} edited: {} new, {} removed",
                paragraph_id,
                outcome.new_citation_ids.len(),
                outcome.removed_citation_ids.len()
            ));
        let edited = self.store.commit(check_id, draft).await?;
        tracing::info!(
            snapshot_id = %edited.id,
            new = ?outcome.new_citation_ids,
            removed = ?outcome.removed_citation_ids,
            "Paragraph reconciled"
        );
        drop(guard);

        let to_validate = outcome.needs_validation();
        let (snapshot, validation_error) = if to_validate.is_empty() {
            (edited.clone(), None)
        } else {
            match self.validate_citations(&edited, &to_validate).await {
                Ok(validated) => (validated, None),
                Err(e) => {
                    tracing::warn!(check_id, "Edit saved, validation failed: {}", e);
                    (edited.clone(), Some(e.to_string()))
                }
            }
        };

        Ok(EditOutcome {
            snapshot,
            edited_snapshot_id: Some(edited.id),
            new_citations: outcome.new_citation_ids,
            modified_citations: outcome.modified_citation_ids,
            removed_citations: outcome.removed_citation_ids,
            unchanged: false,
            validation_error,
        })
    }

    /// Validate a few citations of `base` inline and commit the result
    async fn validate_citations(
        &self,
        base: &DocumentSnapshot,
        citation_ids: &[String],
    ) -> CheckResult<DocumentSnapshot> {
        let work = citation_ids.iter().filter_map(|cid| {
            let mut citation = base.document.citation(cid)?.clone();
            let context = self.context_for(&base.document, cid);
            let validator = &self.validator;
            Some(async move {
                validator.validate(&mut citation, &context, false).await;
                citation
            })
        });
        let results = futures::future::join_all(work).await;

        let _guard = self.lock_check(&base.check_id).await;
        let latest = self.store.current(&base.check_id).await?;
        let mut document = latest.document.clone();
        let stale = merge_validations(&mut document, &results);
        if !stale.is_empty() {
            tracing::warn!(?stale, "Citations changed during validation, results dropped");
        }

        let draft = SnapshotDraft::new(&latest, SnapshotReason::CitationRevalidated, document)
            .with_description(format!("{} citations validated", results.len() - stale.len()));
        Ok(self.store.commit(&base.check_id, draft).await?)
    }

    // === Single citation ===

    /// Re-run Tier 2, and Tier 3 when triggered or forced, for one citation.
    /// Other citations are carried over untouched.
    #[tracing::instrument(skip(self))]
    pub async fn revalidate_citation(
        &self,
        check_id: &str,
        citation_id: &str,
        force_tier3: bool,
    ) -> CheckResult<Citation> {
        let current = self.store.current(check_id).await?;
        let mut citation = current
            .document
            .citation(citation_id)
            .cloned()
            .ok_or_else(|| CheckError::NotFound(format!("citation {}", citation_id)))?;
        let context = self.context_for(&current.document, citation_id);

        let escalated = self
            .validator
            .validate(&mut citation, &context, force_tier3)
            .await;

        let _guard = self.lock_check(check_id).await;
        let latest = self.store.current(check_id).await?;
        let mut document = latest.document.clone();
        if !merge_validations(&mut document, std::slice::from_ref(&citation)).is_empty() {
            return Err(CheckError::Conflict(format!(
                "citation {} changed while it was being validated",
                citation_id
            )));
        }

        let draft = SnapshotDraft::new(&latest, SnapshotReason::CitationRevalidated, document)
            .with_description(format!("{} revalidated", citation_id));
        let snapshot = self.store.commit(check_id, draft).await?;

        tracing::info!(
            citation_id,
            escalated,
            stage = citation.validation.stage.as_str(),
            "Citation revalidated"
        );
        snapshot
            .document
            .citation(citation_id)
            .cloned()
            .ok_or_else(|| CheckError::NotFound(format!("citation {}", citation_id)))
    }

    /// Record a human decision; it outranks both panels
    #[tracing::instrument(skip(self, decision))]
    pub async fn record_manual_review(
        &self,
        check_id: &str,
        citation_id: &str,
        decision: ReviewDecision,
    ) -> CheckResult<Citation> {
        if decision.reviewer.trim().is_empty() {
            return Err(CheckError::Input("reviewer must not be empty".to_string()));
        }
        let _guard = self.lock_check(check_id).await;
        let current = self.store.current(check_id).await?;
        let mut document = current.document.clone();
        let citation = document
            .citation_mut(citation_id)
            .ok_or_else(|| CheckError::NotFound(format!("citation {}", citation_id)))?;
        citation.validation.manual_review = Some(ManualReview {
            status: decision.status,
            note: decision.note,
            reviewer: decision.reviewer,
            reviewed_at: chrono::Utc::now(),
        });
        let reviewed = citation.clone();

        let draft = SnapshotDraft::new(&current, SnapshotReason::ManualReview, document)
            .with_description(format!("{} reviewed", citation_id));
        self.store.commit(check_id, draft).await?;
        Ok(reviewed)
    }

    // === Jobs ===

    pub async fn job(&self, job_id: &str) -> CheckResult<ValidationJob> {
        self.jobs
            .get(job_id)
            .await
            .map_err(infrastructure)?
            .ok_or_else(|| CheckError::NotFound(format!("job {}", job_id)))
    }

    pub async fn jobs_for_check(&self, check_id: &str) -> CheckResult<Vec<ValidationJob>> {
        self.store.check(check_id).await?;
        self.jobs.for_check(check_id).await.map_err(infrastructure)
    }

    /// Register a job for the current snapshot and the citations it covers
    async fn prepare_job(
        &self,
        check_id: &str,
        force: bool,
    ) -> CheckResult<(Arc<JobTracker>, DocumentSnapshot, Vec<String>)> {
        let snapshot = self.store.current(check_id).await?;
        if snapshot.document.citations.is_empty() {
            return Err(CheckError::Input(
                "check has no citations, identify citations first".to_string(),
            ));
        }
        let targets: Vec<String> = snapshot
            .document
            .citations
            .iter()
            .filter(|c| force || needs_run(c))
            .map(|c| c.id.clone())
            .collect();
        if targets.is_empty() {
            return Err(CheckError::Conflict(
                "all citations are already validated, use force to re-run".to_string(),
            ));
        }

        let tracker = self
            .jobs
            .register(ValidationJob::new(check_id, &snapshot.id, force))
            .await
            .map_err(infrastructure)?;
        if let Err(e) = self.store.set_current_job(check_id, &tracker.job_id()).await {
            let err = CheckError::from(e);
            self.fail_job(&tracker, &err).await;
            return Err(err);
        }
        Ok((tracker, snapshot, targets))
    }

    /// Start a validation job in the background and return it queued
    pub async fn start_validation(
        self: &Arc<Self>,
        check_id: &str,
        force: bool,
    ) -> CheckResult<ValidationJob> {
        let (tracker, snapshot, targets) = self.prepare_job(check_id, force).await?;
        let job = tracker.snapshot();
        tracing::info!(job_id = %job.id, check_id, citations = targets.len(), force, "Validation job queued");

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let _ = coordinator.drive(tracker, snapshot, targets).await;
        });
        Ok(job)
    }

    /// Run a validation job to completion and return its final record
    pub async fn validate_now(&self, check_id: &str, force: bool) -> CheckResult<ValidationJob> {
        let (tracker, snapshot, targets) = self.prepare_job(check_id, force).await?;
        self.drive(tracker.clone(), snapshot, targets).await?;
        Ok(tracker.snapshot())
    }

    /// Mark the job failed, persist it and retire its tracker
    async fn fail_job(&self, tracker: &JobTracker, err: &CheckError) {
        tracing::error!(job_id = %tracker.job_id(), "Validation job failed: {}", err);
        let message = err.to_string();
        let job = tracker.record(JobEventKind::Error, None, |job| {
            job.fail(&message);
        });
        self.persist_job(&job);
        self.jobs.retire(&job.id).await;
    }

    async fn drive(
        &self,
        tracker: Arc<JobTracker>,
        snapshot: DocumentSnapshot,
        targets: Vec<String>,
    ) -> CheckResult<DocumentSnapshot> {
        match self.execute_run(&tracker, &snapshot, &targets).await {
            Ok(result) => {
                self.jobs.retire(&tracker.job_id()).await;
                Ok(result)
            }
            Err(e) => {
                self.fail_job(&tracker, &e).await;
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(job_id = %tracker.job_id(), check_id = %snapshot.check_id))]
    async fn execute_run(
        &self,
        tracker: &Arc<JobTracker>,
        snapshot: &DocumentSnapshot,
        targets: &[String],
    ) -> CheckResult<DocumentSnapshot> {
        let total = targets.len();
        let job = tracker.record(JobEventKind::Start, None, |job| job.start(total));
        self.persist_job(&job);

        let work: Vec<(Citation, String)> = targets
            .iter()
            .filter_map(|cid| {
                let citation = snapshot.document.citation(cid)?.clone();
                Some((citation, self.context_for(&snapshot.document, cid)))
            })
            .collect();

        // Tier 2 for everything, then Tier 3 for the triggered subset
        let tier2 = self.run_phase(Tier::Tier2, tracker, work).await;
        let escalate: Vec<(Citation, String)> = tier2
            .iter()
            .filter(|(c, _)| c.validation.stage.needs_tier3())
            .cloned()
            .collect();
        let mut results: HashMap<String, Citation> =
            tier2.into_iter().map(|(c, _)| (c.id.clone(), c)).collect();

        let escalated = escalate.len();
        let job = tracker.record(JobEventKind::Tier2Complete, None, |job| {
            if escalated > 0 {
                job.begin_tier3(escalated);
            }
        });
        self.persist_job(&job);
        tracing::info!(escalated, "Tier 2 complete");

        if escalated > 0 {
            for (citation, _) in self.run_phase(Tier::Tier3, tracker, escalate).await {
                results.insert(citation.id.clone(), citation);
            }
        }

        let results: Vec<Citation> = results.into_values().collect();
        let _guard = self.lock_check(&snapshot.check_id).await;
        let latest = self.store.current(&snapshot.check_id).await?;
        let mut document = latest.document.clone();
        let stale = merge_validations(&mut document, &results);
        if !stale.is_empty() {
            tracing::warn!(?stale, "Citations edited during the run, results dropped");
        }

        let draft = SnapshotDraft::new(&latest, SnapshotReason::Validated, document)
            .with_description(format!(
                "job {}: {} citations validated",
                tracker.job_id(),
                results.len() - stale.len()
            ));
        let committed = self.store.commit(&snapshot.check_id, draft).await?;

        let job = tracker.record(JobEventKind::Complete, None, |job| {
            job.complete(&committed.id);
        });
        self.persist_job(&job);
        tracing::info!(snapshot_id = %committed.id, version = committed.version, "Validation job complete");
        Ok(committed)
    }

    /// Validate every citation of `work` at `tier`, bounded by the
    /// concurrency limit. Each citation moves pending → processing →
    /// completed | failed in the job counters.
    async fn run_phase(
        &self,
        tier: Tier,
        tracker: &Arc<JobTracker>,
        work: Vec<(Citation, String)>,
    ) -> Vec<(Citation, String)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_citations.max(1)));
        let kind = match tier {
            Tier::Tier2 => JobEventKind::Tier2Progress,
            Tier::Tier3 => JobEventKind::Tier3Progress,
        };

        let mut set = JoinSet::new();
        for (mut citation, context) in work {
            let semaphore = semaphore.clone();
            let validator = self.validator.clone();
            let tracker = tracker.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let cid = citation.id.clone();
                tracker.record(kind, Some(&cid), |job| job.progress_mut(tier).start());

                let (succeeded, usage): (bool, TokenUsage) = match tier {
                    Tier::Tier2 => {
                        let (slots, consensus) = validator.run_tier2(&citation, &context).await;
                        let outcome = (consensus.quorum_met, consensus.usage);
                        citation.validation.record_tier2(slots, consensus);
                        outcome
                    }
                    Tier::Tier3 => {
                        let result = validator.run_tier3(&citation, &context).await;
                        let outcome = (result.is_conclusive(), result.consensus.usage);
                        citation.validation.record_tier3(result);
                        outcome
                    }
                };

                tracker.record(kind, Some(&cid), |job| {
                    job.usage.add(&usage);
                    let progress = job.progress_mut(tier);
                    if succeeded {
                        progress.complete();
                    } else {
                        progress.fail();
                    }
                });
                (citation, context)
            });
        }

        let mut done = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(item) => done.push(item),
                Err(e) => {
                    tracing::error!(tier = tier.as_str(), "Citation task aborted: {}", e);
                    tracker.record(kind, None, |job| job.progress_mut(tier).fail());
                }
            }
        }
        done
    }
}
