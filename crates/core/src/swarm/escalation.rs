//! # Escalation Investigator (Tier 3)
//!
//! A second, independent panel with research tools. It sees the same
//! citation and context as Tier 2 plus the Tier-2 consensus. When its own
//! panel reaches quorum, its final risk supersedes Tier 2 for display; the
//! Tier-2 record is kept alongside it. An inconclusive Tier 3 leaves the
//! citation at its Tier-2 status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::consensus::{Consensus, ConsensusCalculator, RiskLevel, Tier};
use super::panel::{PanelEvaluator, PanelRequest};
use super::verdict::{AgentSlot, CaseLink};
use crate::state::document::Citation;

/// Reviewer-facing outcome of an investigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Verified,
    VerifiedWithConcerns,
    NeedsReview,
}

impl FinalStatus {
    pub fn from_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => FinalStatus::Verified,
            RiskLevel::Moderate => FinalStatus::VerifiedWithConcerns,
            RiskLevel::NeedsReview => FinalStatus::NeedsReview,
        }
    }
}

/// Case links one investigator gathered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvidence {
    pub agent_id: String,
    pub case_links: Vec<CaseLink>,
}

/// Outcome of a Tier-3 investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier3Result {
    pub consensus: Consensus,
    pub verdicts: Vec<AgentSlot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<AgentEvidence>,
    /// Absent when the investigation was inconclusive
    #[serde(default)]
    pub final_risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub final_status: Option<FinalStatus>,
    pub investigated_at: DateTime<Utc>,
}

impl Tier3Result {
    pub fn is_conclusive(&self) -> bool {
        self.final_risk_level.is_some()
    }
}

#[derive(Clone)]
pub struct EscalationInvestigator {
    panel: PanelEvaluator,
    calculator: ConsensusCalculator,
}

impl EscalationInvestigator {
    pub fn new(panel: PanelEvaluator, calculator: ConsensusCalculator) -> Self {
        Self { panel, calculator }
    }

    /// Investigate one citation. Never fails: agent trouble shows up as an
    /// inconclusive result.
    pub async fn investigate(
        &self,
        citation: &Citation,
        context: &str,
        tier2: Option<&Consensus>,
    ) -> Tier3Result {
        let request = PanelRequest {
            tier: Tier::Tier3,
            citation: citation.clone(),
            context: context.to_string(),
            prior: tier2.cloned(),
        };
        let verdicts = self.panel.evaluate(&request).await;
        let consensus = self.calculator.calculate(Tier::Tier3, &verdicts);

        let evidence = verdicts
            .iter()
            .filter_map(|slot| slot.verdict())
            .filter(|v| !v.case_links.is_empty())
            .map(|v| AgentEvidence {
                agent_id: v.agent_id.clone(),
                case_links: v.case_links.clone(),
            })
            .collect();

        let final_risk_level = consensus.quorum_met.then_some(consensus.recommendation);
        if final_risk_level.is_none() {
            tracing::warn!(
                citation_id = %citation.id,
                successful = consensus.successful_agents,
                "Tier 3 inconclusive, keeping Tier 2 status"
            );
        }

        Tier3Result {
            final_status: final_risk_level.map(FinalStatus::from_risk),
            final_risk_level,
            consensus,
            verdicts,
            evidence,
            investigated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::consensus::ConsensusPolicy;
    use crate::swarm::panel::testing::*;
    use std::time::Duration;

    fn investigator(agents: &[std::sync::Arc<ScriptedAgent>]) -> EscalationInvestigator {
        EscalationInvestigator::new(
            panel(agents, Duration::from_secs(5)),
            ConsensusCalculator::new(ConsensusPolicy::default()),
        )
    }

    #[tokio::test]
    async fn test_conclusive_investigation_collects_evidence() {
        let agents = scores("investigator", &[3.0, 4.0, 2.0]);
        let tier2 = ConsensusCalculator::default().calculate(Tier::Tier2, &[]);
        let result = investigator(&agents)
            .investigate(&citation("cit_001", "410 U.S. 113"), "ctx", Some(&tier2))
            .await;

        assert!(result.is_conclusive());
        assert_eq!(result.final_risk_level, Some(RiskLevel::NeedsReview));
        assert_eq!(result.final_status, Some(FinalStatus::NeedsReview));
        assert_eq!(result.consensus.tier, Tier::Tier3);
        assert_eq!(result.evidence.len(), 3);

        // Investigators are shown the Tier-2 consensus
        assert!(agents.iter().all(|a| a.seen() == vec![("cit_001".to_string(), true)]));
    }

    #[tokio::test]
    async fn test_failed_investigation_is_inconclusive() {
        let agents = vec![
            ScriptedAgent::new("investigator_1", Script::Fail),
            ScriptedAgent::new("investigator_2", Script::Fail),
            ScriptedAgent::new("investigator_3", Script::Score(9.0)),
        ];
        let result = investigator(&agents)
            .investigate(&citation("cit_001", "410 U.S. 113"), "ctx", None)
            .await;

        assert!(!result.is_conclusive());
        assert_eq!(result.final_status, None);
        assert!(!result.consensus.quorum_met);
        assert_eq!(result.verdicts.len(), 3);
    }

    #[test]
    fn test_final_status_mapping() {
        assert_eq!(FinalStatus::from_risk(RiskLevel::Low), FinalStatus::Verified);
        assert_eq!(
            FinalStatus::from_risk(RiskLevel::Moderate),
            FinalStatus::VerifiedWithConcerns
        );
    }
}
