//! # Document Structure
//!
//! Paragraphs and the citation array that travel together inside every
//! snapshot, plus the per-citation validation record that Tier 2, Tier 3 and
//! manual review write into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::swarm::consensus::{Consensus, RiskLevel};
use crate::swarm::escalation::Tier3Result;
use crate::swarm::pipeline::CitationStage;
use crate::swarm::verdict::AgentSlot;
use crate::tools::identifier::{CitationComponents, CitationType};
use crate::tools::markers;
use crate::tools::reconciler::ReconcileOutcome;

/// Prefix of every citation id
pub const CITATION_ID_PREFIX: &str = "cit_";
/// Prefix of every paragraph id
pub const PARAGRAPH_ID_PREFIX: &str = "p_";

/// Format a citation id from its sequence number
pub fn citation_id(seq: u32) -> String {
    format!("{}{:03}", CITATION_ID_PREFIX, seq)
}

/// Sequence number of a citation id, if it follows the numbering scheme
pub fn citation_seq(id: &str) -> Option<u32> {
    id.strip_prefix(CITATION_ID_PREFIX)?.parse().ok()
}

/// Format a paragraph id from its position
pub fn paragraph_id(index: usize) -> String {
    format!("{}{:03}", PARAGRAPH_ID_PREFIX, index + 1)
}

/// A paragraph. `text` carries citation markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: String,
    pub text: String,
}

impl Paragraph {
    pub fn plain_text(&self) -> String {
        markers::strip(&self.text)
    }
}

/// Out-of-band human decision; authoritative over both tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualReview {
    pub status: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub reviewer: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Where a citation's effective risk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewSource {
    Manual,
    Tier3,
    Tier2,
}

/// Validation history of one citation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CitationValidation {
    #[serde(default)]
    pub stage: CitationStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier2: Option<Consensus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tier2_verdicts: Vec<AgentSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier3: Option<Tier3Result>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_review: Option<ManualReview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
}

impl CitationValidation {
    /// Record a fresh Tier-2 run. A previous Tier-3 result belonged to the
    /// previous Tier-2 consensus and is dropped from this record; older
    /// snapshots keep it.
    pub fn record_tier2(&mut self, slots: Vec<AgentSlot>, consensus: Consensus) {
        self.stage = CitationStage::after_tier2(&consensus);
        self.tier2 = Some(consensus);
        self.tier2_verdicts = slots;
        self.tier3 = None;
        self.validated_at = Some(Utc::now());
    }

    /// Request Tier 3 regardless of the trigger
    pub fn force_escalation(&mut self) -> bool {
        self.stage.force_escalation()
    }

    pub fn record_tier3(&mut self, result: Tier3Result) {
        self.stage = CitationStage::after_tier3(result.is_conclusive());
        self.tier3 = Some(result);
        self.validated_at = Some(Utc::now());
    }

    pub fn is_validated(&self) -> bool {
        self.stage.has_tier2()
    }

    /// Risk to display: manual review, then conclusive Tier 3, then Tier 2
    pub fn effective_risk(&self) -> Option<(RiskLevel, ReviewSource)> {
        if let Some(review) = &self.manual_review {
            return Some((review.status, ReviewSource::Manual));
        }
        if let Some(level) = self.tier3.as_ref().and_then(|t| t.final_risk_level) {
            return Some((level, ReviewSource::Tier3));
        }
        self.tier2
            .as_ref()
            .map(|c| (c.recommendation, ReviewSource::Tier2))
    }
}

/// A citation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub text: String,
    pub citation_type: CitationType,
    pub paragraph_id: String,
    #[serde(default)]
    pub components: CitationComponents,
    #[serde(default)]
    pub validation: CitationValidation,
}

/// Paragraphs plus citations, the payload of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub title: String,
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Lineage counter for the next citation id; never decreases
    #[serde(default = "first_seq")]
    pub next_citation_seq: u32,
}

fn first_seq() -> u32 {
    1
}

impl DocumentStructure {
    /// Build a fresh document from plain paragraph texts
    pub fn from_plain_paragraphs(title: &str, texts: &[String]) -> Result<Self, String> {
        let mut paragraphs = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let marked = markers::parse(text)
                .map_err(|e| format!("paragraph {}: {}", i + 1, e))?;
            if !marked.spans.is_empty() {
                return Err(format!(
                    "paragraph {} already contains citation markers",
                    i + 1
                ));
            }
            paragraphs.push(Paragraph {
                id: paragraph_id(i),
                text: text.clone(),
            });
        }

        Ok(Self {
            title: title.to_string(),
            paragraphs,
            citations: Vec::new(),
            next_citation_seq: 1,
        })
    }

    pub fn paragraph(&self, id: &str) -> Option<&Paragraph> {
        self.paragraphs.iter().find(|p| p.id == id)
    }

    pub fn paragraph_mut(&mut self, id: &str) -> Option<&mut Paragraph> {
        self.paragraphs.iter_mut().find(|p| p.id == id)
    }

    pub fn citation(&self, id: &str) -> Option<&Citation> {
        self.citations.iter().find(|c| c.id == id)
    }

    pub fn citation_mut(&mut self, id: &str) -> Option<&mut Citation> {
        self.citations.iter_mut().find(|c| c.id == id)
    }

    pub fn citations_in(&self, paragraph_id: &str) -> Vec<&Citation> {
        self.citations
            .iter()
            .filter(|c| c.paragraph_id == paragraph_id)
            .collect()
    }

    /// Next citation sequence number.
    ///
    /// The stored counter is authoritative; the max-suffix scan only guards
    /// against documents whose counter lags ids assigned elsewhere.
    pub fn next_seq(&self) -> u32 {
        let scanned = self
            .citations
            .iter()
            .filter_map(|c| citation_seq(&c.id))
            .max()
            .map_or(1, |m| m + 1);
        self.next_citation_seq.max(scanned).max(1)
    }

    /// Apply a reconciled paragraph: new text, its citation set, and the
    /// advanced counter. Returns false if the paragraph does not exist.
    pub fn apply_reconciliation(&mut self, outcome: &ReconcileOutcome) -> bool {
        let Some(paragraph) = self.paragraph_mut(&outcome.paragraph_id) else {
            return false;
        };
        paragraph.text = outcome.paragraph_text.clone();

        self.citations
            .retain(|c| c.paragraph_id != outcome.paragraph_id);
        self.citations.extend(outcome.citations.iter().cloned());
        self.next_citation_seq = self.next_citation_seq.max(outcome.next_seq);
        self.sort_citations();
        true
    }

    /// Put citations in reading order: paragraph order, then marker position
    pub fn sort_citations(&mut self) {
        let mut positions = std::collections::HashMap::new();
        for (p_idx, paragraph) in self.paragraphs.iter().enumerate() {
            if let Ok(marked) = markers::parse(&paragraph.text) {
                for span in marked.spans {
                    positions.insert(span.id, (p_idx, span.start));
                }
            }
        }
        self.citations.sort_by_key(|c| {
            positions
                .get(&c.id)
                .copied()
                .unwrap_or((usize::MAX, usize::MAX))
        });
    }

    /// Check the lineage invariants: unique ids, every citation marked in
    /// exactly the paragraph it claims, every marker backed by a citation.
    pub fn check_integrity(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for citation in &self.citations {
            if !seen.insert(citation.id.as_str()) {
                return Err(format!("duplicate citation id {}", citation.id));
            }
        }

        let mut marked_ids = HashSet::new();
        for paragraph in &self.paragraphs {
            let marked = markers::parse(&paragraph.text)
                .map_err(|e| format!("paragraph {}: {}", paragraph.id, e))?;
            for span in marked.spans {
                match self.citation(&span.id) {
                    Some(c) if c.paragraph_id == paragraph.id => {}
                    Some(c) => {
                        return Err(format!(
                            "citation {} is marked in {} but belongs to {}",
                            span.id, paragraph.id, c.paragraph_id
                        ))
                    }
                    None => {
                        return Err(format!(
                            "marker {} in {} has no citation record",
                            span.id, paragraph.id
                        ))
                    }
                }
                marked_ids.insert(span.id);
            }
        }

        if let Some(orphan) = self.citations.iter().find(|c| !marked_ids.contains(&c.id)) {
            return Err(format!("citation {} has no marker", orphan.id));
        }
        Ok(())
    }

    /// Plain text around a citation: its paragraph plus `radius` neighbours on
    /// each side, bounded to `max_chars` characters centred on the citation.
    pub fn context_window(&self, citation_id: &str, radius: usize, max_chars: usize) -> Option<String> {
        let citation = self.citation(citation_id)?;
        let idx = self
            .paragraphs
            .iter()
            .position(|p| p.id == citation.paragraph_id)?;

        let first = idx.saturating_sub(radius);
        let last = (idx + radius).min(self.paragraphs.len().saturating_sub(1));
        let joined = self.paragraphs[first..=last]
            .iter()
            .map(|p| p.plain_text())
            .collect::<Vec<_>>()
            .join("\n\n");

        let chars: Vec<char> = joined.chars().collect();
        if max_chars == 0 || chars.len() <= max_chars {
            return Some(joined);
        }

        // Centre the window on the citation text when it can be found
        let anchor = joined
            .find(&citation.text)
            .map(|byte| joined[..byte].chars().count() + citation.text.chars().count() / 2)
            .unwrap_or(chars.len() / 2);
        let start = anchor
            .saturating_sub(max_chars / 2)
            .min(chars.len() - max_chars);
        Some(chars[start..start + max_chars].iter().collect())
    }
}
