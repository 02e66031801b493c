//! # Citation Pipeline Stages
//!
//! Explicit per-citation state machine for tiered validation.
//!
//! ```text
//! Unvalidated ──tier2──▶ Tier2Done ──────────────────────────▶ (settled)
//!      │                    │ force
//!      │                    ▼
//!      ├──tier2──▶ Tier3Triggered ──tier3──▶ Tier3Done | Tier3Failed
//!      │                    ▲ force
//!      └──tier2──▶ Tier2Failed (no quorum, needs review)
//! ```

use serde::{Deserialize, Serialize};

use super::consensus::Consensus;

/// Stage of one citation's validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CitationStage {
    /// Never validated, or reset by an edit
    #[default]
    Unvalidated,
    /// Tier 2 could not reach quorum; needs review by policy
    Tier2Failed,
    /// Tier 2 consensus computed, no escalation
    Tier2Done,
    /// Tier 2 consensus asked for escalation; Tier 3 pending
    Tier3Triggered,
    /// Tier 3 produced a conclusive result
    Tier3Done,
    /// Tier 3 ran but was inconclusive; Tier 2 status stands
    Tier3Failed,
}

impl CitationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStage::Unvalidated => "unvalidated",
            CitationStage::Tier2Failed => "tier2_failed",
            CitationStage::Tier2Done => "tier2_done",
            CitationStage::Tier3Triggered => "tier3_triggered",
            CitationStage::Tier3Done => "tier3_done",
            CitationStage::Tier3Failed => "tier3_failed",
        }
    }

    /// Stage after a Tier-2 consensus is recorded
    pub fn after_tier2(consensus: &Consensus) -> Self {
        if !consensus.quorum_met {
            CitationStage::Tier2Failed
        } else if consensus.tier_3_trigger {
            CitationStage::Tier3Triggered
        } else {
            CitationStage::Tier2Done
        }
    }

    /// Move to `Tier3Triggered` on request. Returns false when Tier 2 has
    /// not run yet, so escalation has nothing to build on.
    pub fn force_escalation(&mut self) -> bool {
        match self {
            CitationStage::Unvalidated => false,
            CitationStage::Tier3Triggered => true,
            _ => {
                *self = CitationStage::Tier3Triggered;
                true
            }
        }
    }

    /// Stage after Tier 3 finishes
    pub fn after_tier3(conclusive: bool) -> Self {
        if conclusive {
            CitationStage::Tier3Done
        } else {
            CitationStage::Tier3Failed
        }
    }

    pub fn needs_tier3(&self) -> bool {
        *self == CitationStage::Tier3Triggered
    }

    pub fn has_tier2(&self) -> bool {
        *self != CitationStage::Unvalidated
    }

    /// No further automatic work is pending
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            CitationStage::Tier2Failed
                | CitationStage::Tier2Done
                | CitationStage::Tier3Done
                | CitationStage::Tier3Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::consensus::{ConsensusCalculator, Tier};
    use crate::swarm::verdict::{AgentSlot, PanelVerdict};

    fn consensus(scores: &[f64]) -> Consensus {
        let slots: Vec<AgentSlot> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| AgentSlot::Succeeded {
                verdict: PanelVerdict::score(&format!("a{}", i), *s, ""),
            })
            .collect();
        ConsensusCalculator::default().calculate(Tier::Tier2, &slots)
    }

    #[test]
    fn test_tier2_transitions() {
        assert_eq!(
            CitationStage::after_tier2(&consensus(&[9.0, 9.0, 9.0])),
            CitationStage::Tier2Done
        );
        assert_eq!(
            CitationStage::after_tier2(&consensus(&[9.0, 9.0, 8.0, 2.0, 9.0])),
            CitationStage::Tier3Triggered
        );
        assert_eq!(
            CitationStage::after_tier2(&consensus(&[9.0])),
            CitationStage::Tier2Failed
        );
    }

    #[test]
    fn test_forced_escalation() {
        let mut stage = CitationStage::Unvalidated;
        assert!(!stage.force_escalation());
        assert_eq!(stage, CitationStage::Unvalidated);

        let mut stage = CitationStage::Tier2Done;
        assert!(stage.force_escalation());
        assert!(stage.needs_tier3());
        assert!(!stage.is_settled());
    }

    #[test]
    fn test_tier3_outcomes_settle() {
        assert!(CitationStage::after_tier3(true).is_settled());
        assert_eq!(CitationStage::after_tier3(false), CitationStage::Tier3Failed);
        assert!(CitationStage::Tier3Failed.has_tier2());
    }
}
