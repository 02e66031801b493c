//! Reviewer-facing roll-up of a snapshot's citations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{Citation, ReviewSource};
use super::snapshots::DocumentSnapshot;
use crate::swarm::consensus::RiskLevel;
use crate::swarm::pipeline::CitationStage;
use crate::swarm::verdict::TokenUsage;
use crate::tools::identifier::CitationType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CitationStatus {
    pub citation_id: String,
    pub text: String,
    pub citation_type: CitationType,
    pub paragraph_id: String,
    pub stage: CitationStage,
    /// Manual review, then conclusive Tier 3, then Tier 2
    pub effective_risk: Option<RiskLevel>,
    pub source: Option<ReviewSource>,
    pub average_score: Option<f64>,
    pub escalated: bool,
}

impl CitationStatus {
    fn of(citation: &Citation) -> Self {
        let validation = &citation.validation;
        let effective = validation.effective_risk();
        Self {
            citation_id: citation.id.clone(),
            text: citation.text.clone(),
            citation_type: citation.citation_type,
            paragraph_id: citation.paragraph_id.clone(),
            stage: validation.stage,
            effective_risk: effective.map(|(risk, _)| risk),
            source: effective.map(|(_, source)| source),
            average_score: validation.tier2.as_ref().and_then(|c| c.average_score()),
            escalated: validation.tier3.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RiskCounts {
    pub low: usize,
    pub moderate: usize,
    pub needs_review: usize,
    pub unvalidated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub check_id: String,
    pub snapshot_id: String,
    pub version: u32,
    pub total_citations: usize,
    pub counts: RiskCounts,
    pub manually_reviewed: usize,
    pub escalated: usize,
    /// Tokens and cost of the validations recorded in this snapshot
    pub usage: TokenUsage,
    pub citations: Vec<CitationStatus>,
    pub generated_at: DateTime<Utc>,
}

impl CheckSummary {
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Self {
        let citations: Vec<CitationStatus> = snapshot
            .document
            .citations
            .iter()
            .map(CitationStatus::of)
            .collect();

        let mut counts = RiskCounts::default();
        for status in &citations {
            match status.effective_risk {
                Some(RiskLevel::Low) => counts.low += 1,
                Some(RiskLevel::Moderate) => counts.moderate += 1,
                Some(RiskLevel::NeedsReview) => counts.needs_review += 1,
                None => counts.unvalidated += 1,
            }
        }

        let mut usage = TokenUsage::default();
        for citation in &snapshot.document.citations {
            if let Some(tier2) = &citation.validation.tier2 {
                usage.add(&tier2.usage);
            }
            if let Some(tier3) = &citation.validation.tier3 {
                usage.add(&tier3.consensus.usage);
            }
        }

        Self {
            check_id: snapshot.check_id.clone(),
            snapshot_id: snapshot.id.clone(),
            version: snapshot.version,
            total_citations: citations.len(),
            manually_reviewed: citations
                .iter()
                .filter(|c| c.source == Some(ReviewSource::Manual))
                .count(),
            escalated: citations.iter().filter(|c| c.escalated).count(),
            counts,
            usage,
            citations,
            generated_at: Utc::now(),
        }
    }
}
