//! # Paragraph Reconciler
//!
//! Keeps citation identity stable across paragraph edits. The edited text is
//! re-run through the identifier and every detected span is matched against
//! the citations previously recorded for the paragraph:
//!
//! 1. a marker kept in the edited text claims the detection it overlaps;
//! 2. otherwise a prior citation with the same text claims it, nearest prior
//!    position first;
//! 3. anything left gets a fresh id from the lineage counter.
//!
//! Prior citations that claim nothing are reported as removed. Their ids are
//! never handed out again because the counter only moves forward.

use std::collections::HashMap;

use thiserror::Error;

use super::identifier::{CitationIdentifier, DetectedCitation};
use super::markers::{self, MarkedSpan, MarkerError};
use crate::state::document::{citation_id, Citation, CitationValidation, Paragraph};

/// Longest paragraph accepted from an edit
pub const MAX_PARAGRAPH_CHARS: usize = 20_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("paragraph text exceeds {max} characters")]
    TooLong { max: usize },

    #[error("paragraph text contains control character U+{0:04X}")]
    ControlCharacter(u32),

    #[error("malformed citation markup: {0}")]
    Markup(#[from] MarkerError),
}

/// Result of reconciling one paragraph
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub paragraph_id: String,
    /// Paragraph text with markers rewritten
    pub paragraph_text: String,
    /// Every citation of the paragraph after the edit, in reading order
    pub citations: Vec<Citation>,
    pub new_citation_ids: Vec<String>,
    /// Kept ids whose text changed in place; their validation was reset
    pub modified_citation_ids: Vec<String>,
    pub removed_citation_ids: Vec<String>,
    pub next_seq: u32,
    pub unchanged: bool,
}

impl ReconcileOutcome {
    /// Ids that need a fresh validation
    pub fn needs_validation(&self) -> Vec<String> {
        self.new_citation_ids
            .iter()
            .chain(self.modified_citation_ids.iter())
            .cloned()
            .collect()
    }
}

enum Claim {
    Kept(usize),
    Modified(usize),
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn overlaps(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

fn check_input(text: &str) -> Result<(), ReconcileError> {
    if text.chars().count() > MAX_PARAGRAPH_CHARS {
        return Err(ReconcileError::TooLong {
            max: MAX_PARAGRAPH_CHARS,
        });
    }
    if let Some(c) = text
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(ReconcileError::ControlCharacter(c as u32));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphReconciler {
    identifier: CitationIdentifier,
}

impl ParagraphReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile an edit of `paragraph`. `existing` may hold the whole
    /// document's citations; only those of this paragraph are considered.
    pub fn reconcile(
        &self,
        paragraph: &Paragraph,
        existing: &[Citation],
        edited: &str,
        next_seq: u32,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        check_input(edited)?;

        if edited == paragraph.text || edited == paragraph.plain_text() {
            return Ok(ReconcileOutcome {
                paragraph_id: paragraph.id.clone(),
                paragraph_text: paragraph.text.clone(),
                citations: existing
                    .iter()
                    .filter(|c| c.paragraph_id == paragraph.id)
                    .cloned()
                    .collect(),
                new_citation_ids: Vec::new(),
                modified_citation_ids: Vec::new(),
                removed_citation_ids: Vec::new(),
                next_seq,
                unchanged: true,
            });
        }

        self.rebuild(paragraph, existing, edited, next_seq)
    }

    /// Re-detect citations in the stored text, keeping every known id
    pub fn refresh(
        &self,
        paragraph: &Paragraph,
        existing: &[Citation],
        next_seq: u32,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.rebuild(paragraph, existing, &paragraph.text, next_seq)
    }

    fn rebuild(
        &self,
        paragraph: &Paragraph,
        existing: &[Citation],
        edited: &str,
        mut next_seq: u32,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let edited = markers::parse(edited)?;
        let prior: Vec<&Citation> = existing
            .iter()
            .filter(|c| c.paragraph_id == paragraph.id)
            .collect();
        let prior_index: HashMap<&str, usize> = prior
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();
        let prior_positions: HashMap<String, usize> = markers::parse(&paragraph.text)
            .map(|m| m.spans.into_iter().map(|s| (s.id, s.start)).collect())
            .unwrap_or_default();

        // Markers naming citations of other paragraphs are plain text here
        let retained: Vec<&MarkedSpan> = edited
            .spans
            .iter()
            .filter(|s| prior_index.contains_key(s.id.as_str()))
            .collect();
        let detections = self.identifier.identify(&edited.plain);

        let mut used = vec![false; prior.len()];
        let mut claims: Vec<Option<Claim>> = detections.iter().map(|_| None).collect();

        for (d, det) in detections.iter().enumerate() {
            let Some(span) = retained.iter().find(|s| {
                overlaps(s.start, s.end, det.start, det.end) && !used[prior_index[s.id.as_str()]]
            }) else {
                continue;
            };
            let p = prior_index[span.id.as_str()];
            used[p] = true;
            claims[d] = Some(if normalize(&prior[p].text) == normalize(&det.text) {
                Claim::Kept(p)
            } else {
                Claim::Modified(p)
            });
        }

        for (d, det) in detections.iter().enumerate() {
            if claims[d].is_some() {
                continue;
            }
            let wanted = normalize(&det.text);
            let nearest = prior
                .iter()
                .enumerate()
                .filter(|(p, c)| !used[*p] && normalize(&c.text) == wanted)
                .min_by_key(|(_, c)| {
                    prior_positions
                        .get(&c.id)
                        .map_or(usize::MAX, |pos| pos.abs_diff(det.start))
                })
                .map(|(p, _)| p);
            if let Some(p) = nearest {
                used[p] = true;
                claims[d] = Some(Claim::Kept(p));
            }
        }

        let mut placed: Vec<(MarkedSpan, Citation)> = Vec::new();
        let mut new_ids = Vec::new();
        let mut modified_ids = Vec::new();

        // A kept marker the identifier no longer recognises still asserts a
        // citation, as long as its text is untouched
        for span in &retained {
            let p = prior_index[span.id.as_str()];
            let text = &edited.plain[span.start..span.end];
            let clear = !detections
                .iter()
                .any(|d| overlaps(span.start, span.end, d.start, d.end));
            if !used[p] && clear && normalize(text) == normalize(&prior[p].text) {
                used[p] = true;
                placed.push(((*span).clone(), prior[p].clone()));
            }
        }

        for (det, claim) in detections.iter().zip(claims) {
            let citation = match claim {
                Some(Claim::Kept(p)) => prior[p].clone(),
                Some(Claim::Modified(p)) => {
                    modified_ids.push(prior[p].id.clone());
                    fresh(&prior[p].id, &paragraph.id, det)
                }
                None => {
                    let id = citation_id(next_seq);
                    next_seq += 1;
                    new_ids.push(id.clone());
                    fresh(&id, &paragraph.id, det)
                }
            };
            placed.push((
                MarkedSpan {
                    id: citation.id.clone(),
                    start: det.start,
                    end: det.end,
                },
                citation,
            ));
        }

        placed.sort_by_key(|(span, _)| span.start);
        let spans: Vec<MarkedSpan> = placed.iter().map(|(s, _)| s.clone()).collect();
        let removed = prior
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .map(|(c, _)| c.id.clone())
            .collect::<Vec<_>>();

        Ok(ReconcileOutcome {
            paragraph_id: paragraph.id.clone(),
            paragraph_text: markers::render(&edited.plain, &spans),
            citations: placed.into_iter().map(|(_, c)| c).collect(),
            unchanged: new_ids.is_empty() && modified_ids.is_empty() && removed.is_empty(),
            new_citation_ids: new_ids,
            modified_citation_ids: modified_ids,
            removed_citation_ids: removed,
            next_seq,
        })
    }
}

fn fresh(id: &str, paragraph_id: &str, det: &DetectedCitation) -> Citation {
    Citation {
        id: id.to_string(),
        text: det.text.clone(),
        citation_type: det.citation_type,
        paragraph_id: paragraph_id.to_string(),
        components: det.components.clone(),
        validation: CitationValidation::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::pipeline::CitationStage;
    use crate::tools::identifier::CitationType;

    const BROWN: &str = "Brown v. Board of Education, 347 U.S. 483 (1954)";
    const ROE: &str = "Roe v. Wade, 410 U.S. 113 (1973)";
    const SECTION_1983: &str = "42 U.S.C. § 1983";

    fn citation(id: &str, text: &str) -> Citation {
        Citation {
            id: id.to_string(),
            text: text.to_string(),
            citation_type: CitationType::Case,
            paragraph_id: "p_002".to_string(),
            components: Default::default(),
            validation: CitationValidation {
                stage: CitationStage::Tier2Done,
                ..Default::default()
            },
        }
    }

    fn marked(id: &str, text: &str) -> String {
        format!("<cite id=\"{}\">{}</cite>", id, text)
    }

    fn paragraph_two() -> (Paragraph, Vec<Citation>) {
        let paragraph = Paragraph {
            id: "p_002".to_string(),
            text: format!(
                "First, {}. Second, {}.",
                marked("cit_003", BROWN),
                marked("cit_004", SECTION_1983)
            ),
        };
        let citations = vec![citation("cit_003", BROWN), citation("cit_004", SECTION_1983)];
        (paragraph, citations)
    }

    #[test]
    fn test_unchanged_paragraph_is_noop() {
        let (paragraph, citations) = paragraph_two();
        let reconciler = ParagraphReconciler::new();

        for edited in [paragraph.text.clone(), paragraph.plain_text()] {
            let outcome = reconciler
                .reconcile(&paragraph, &citations, &edited, 7)
                .unwrap();
            assert!(outcome.unchanged);
            assert!(outcome.new_citation_ids.is_empty());
            assert!(outcome.removed_citation_ids.is_empty());
            assert_eq!(outcome.next_seq, 7);
            assert_eq!(outcome.paragraph_text, paragraph.text);
        }
    }

    #[test]
    fn test_removed_and_new_citation_in_plain_edit() {
        let (paragraph, citations) = paragraph_two();
        let edited = format!("Second, {}. Also {}.", SECTION_1983, ROE);

        let outcome = ParagraphReconciler::new()
            .reconcile(&paragraph, &citations, &edited, 7)
            .unwrap();

        assert_eq!(outcome.removed_citation_ids, vec!["cit_003"]);
        assert_eq!(outcome.new_citation_ids, vec!["cit_007"]);
        assert_eq!(outcome.next_seq, 8);
        assert_eq!(
            outcome.paragraph_text,
            format!(
                "Second, {}. Also {}.",
                marked("cit_004", SECTION_1983),
                marked("cit_007", ROE)
            )
        );

        // Kept citation keeps its validation history
        assert_eq!(outcome.citations[0].id, "cit_004");
        assert_eq!(outcome.citations[0].validation.stage, CitationStage::Tier2Done);
        assert_eq!(outcome.citations[1].validation.stage, CitationStage::Unvalidated);
    }

    #[test]
    fn test_marker_claims_in_place_correction() {
        let (paragraph, citations) = paragraph_two();
        let edited = format!(
            "First, {}. Second, {}.",
            marked("cit_003", BROWN),
            marked("cit_004", "42 U.S.C. § 1985")
        );

        let outcome = ParagraphReconciler::new()
            .reconcile(&paragraph, &citations, &edited, 7)
            .unwrap();

        assert!(outcome.new_citation_ids.is_empty());
        assert!(outcome.removed_citation_ids.is_empty());
        assert_eq!(outcome.modified_citation_ids, vec!["cit_004"]);
        assert_eq!(outcome.citations[1].text, "42 U.S.C. § 1985");
        assert_eq!(outcome.citations[1].validation.stage, CitationStage::Unvalidated);
        assert_eq!(outcome.needs_validation(), vec!["cit_004"]);
    }

    #[test]
    fn test_duplicate_text_matches_nearest_and_mints_extra() {
        let paragraph = Paragraph {
            id: "p_002".to_string(),
            text: format!("A {} B.", marked("cit_003", SECTION_1983)),
        };
        let citations = vec![citation("cit_003", SECTION_1983)];
        let edited = format!("A {} B, and again {}.", SECTION_1983, SECTION_1983);

        let outcome = ParagraphReconciler::new()
            .reconcile(&paragraph, &citations, &edited, 4)
            .unwrap();

        assert_eq!(outcome.citations[0].id, "cit_003");
        assert_eq!(outcome.new_citation_ids, vec!["cit_004"]);
        assert!(outcome.removed_citation_ids.is_empty());
    }

    #[test]
    fn test_retired_ids_are_never_reused() {
        let (paragraph, citations) = paragraph_two();
        let reconciler = ParagraphReconciler::new();

        let removed = reconciler
            .reconcile(&paragraph, &citations, "Nothing cited any more.", 7)
            .unwrap();
        assert_eq!(removed.removed_citation_ids, vec!["cit_003", "cit_004"]);

        let empty = Paragraph {
            id: "p_002".to_string(),
            text: removed.paragraph_text.clone(),
        };
        let readded = reconciler
            .reconcile(&empty, &removed.citations, BROWN, removed.next_seq)
            .unwrap();
        assert_eq!(readded.new_citation_ids, vec!["cit_007"]);
    }

    #[test]
    fn test_foreign_markers_are_plain_text() {
        let (paragraph, citations) = paragraph_two();
        let edited = format!("See {}.", marked("cit_001", ROE));

        let outcome = ParagraphReconciler::new()
            .reconcile(&paragraph, &citations, &edited, 7)
            .unwrap();

        assert_eq!(outcome.new_citation_ids, vec!["cit_007"]);
        assert!(!outcome.paragraph_text.contains("cit_001"));
    }

    #[test]
    fn test_malformed_edits_are_rejected() {
        let (paragraph, citations) = paragraph_two();
        let reconciler = ParagraphReconciler::new();

        assert!(matches!(
            reconciler.reconcile(&paragraph, &citations, "broken <cite id=\"x\">", 7),
            Err(ReconcileError::Markup(_))
        ));
        assert!(matches!(
            reconciler.reconcile(&paragraph, &citations, "bell \u{7}", 7),
            Err(ReconcileError::ControlCharacter(7))
        ));
        let long = "a".repeat(MAX_PARAGRAPH_CHARS + 1);
        assert!(matches!(
            reconciler.reconcile(&paragraph, &citations, &long, 7),
            Err(ReconcileError::TooLong { .. })
        ));
    }

    #[test]
    fn test_refresh_keeps_known_ids_and_finds_new() {
        let paragraph = Paragraph {
            id: "p_002".to_string(),
            text: format!("{} and {}.", marked("cit_003", BROWN), SECTION_1983),
        };
        let citations = vec![citation("cit_003", BROWN)];

        let outcome = ParagraphReconciler::new()
            .refresh(&paragraph, &citations, 5)
            .unwrap();

        assert_eq!(outcome.citations.len(), 2);
        assert_eq!(outcome.citations[0].id, "cit_003");
        assert_eq!(outcome.new_citation_ids, vec!["cit_005"]);
        assert!(!outcome.unchanged);
    }
}
