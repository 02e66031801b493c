//! # Tier Validator
//!
//! The per-citation validation path shared by batch runs and single-citation
//! reprocessing: Tier 2, consensus, then Tier 3 when the citation's stage
//! says so.

use super::consensus::{Consensus, ConsensusCalculator, Tier};
use super::escalation::{EscalationInvestigator, Tier3Result};
use super::panel::{PanelEvaluator, PanelRequest};
use super::verdict::AgentSlot;
use crate::state::document::Citation;

#[derive(Clone)]
pub struct TierValidator {
    tier2: PanelEvaluator,
    investigator: EscalationInvestigator,
    calculator: ConsensusCalculator,
}

impl TierValidator {
    pub fn new(tier2: PanelEvaluator, tier3: PanelEvaluator, calculator: ConsensusCalculator) -> Self {
        Self {
            tier2,
            investigator: EscalationInvestigator::new(tier3, calculator),
            calculator,
        }
    }

    pub fn calculator(&self) -> &ConsensusCalculator {
        &self.calculator
    }

    /// Run the Tier-2 panel and compute its consensus
    pub async fn run_tier2(&self, citation: &Citation, context: &str) -> (Vec<AgentSlot>, Consensus) {
        let request = PanelRequest {
            tier: Tier::Tier2,
            citation: citation.clone(),
            context: context.to_string(),
            prior: None,
        };
        let slots = self.tier2.evaluate(&request).await;
        let consensus = self.calculator.calculate(Tier::Tier2, &slots);

        tracing::debug!(
            citation_id = %citation.id,
            recommendation = ?consensus.recommendation,
            trigger = consensus.tier_3_trigger,
            "Tier 2 consensus"
        );
        (slots, consensus)
    }

    pub async fn run_tier3(&self, citation: &Citation, context: &str) -> Tier3Result {
        self.investigator
            .investigate(citation, context, citation.validation.tier2.as_ref())
            .await
    }

    /// Validate one citation in place: Tier 2, then Tier 3 if triggered or
    /// forced. Returns whether Tier 3 ran.
    pub async fn validate(&self, citation: &mut Citation, context: &str, force_tier3: bool) -> bool {
        let (slots, consensus) = self.run_tier2(citation, context).await;
        citation.validation.record_tier2(slots, consensus);
        if force_tier3 {
            citation.validation.force_escalation();
        }

        if !citation.validation.stage.needs_tier3() {
            return false;
        }
        let result = self.run_tier3(citation, context).await;
        citation.validation.record_tier3(result);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::document::ReviewSource;
    use crate::swarm::consensus::RiskLevel;
    use crate::swarm::panel::testing::*;
    use crate::swarm::pipeline::CitationStage;
    use std::time::Duration;

    fn validator(tier2: &[f64], tier3: &[f64]) -> (TierValidator, Vec<std::sync::Arc<ScriptedAgent>>) {
        let investigators = scores("investigator", tier3);
        let validator = TierValidator::new(
            panel(&scores("panelist", tier2), Duration::from_secs(5)),
            panel(&investigators, Duration::from_secs(5)),
            ConsensusCalculator::default(),
        );
        (validator, investigators)
    }

    #[tokio::test]
    async fn test_outlier_escalates_and_tier3_supersedes() {
        let (validator, investigators) = validator(&[9.0, 9.0, 8.0, 2.0, 9.0], &[9.0, 9.5, 9.0]);
        let mut citation = citation("cit_001", "Roe v. Wade, 410 U.S. 113 (1973)");

        let escalated = validator.validate(&mut citation, "ctx", false).await;

        assert!(escalated);
        let tier2 = citation.validation.tier2.as_ref().unwrap();
        assert!((tier2.average_score().unwrap() - 7.4).abs() < 1e-9);
        assert_eq!(tier2.recommendation, RiskLevel::Moderate);
        assert!(tier2.tier_3_trigger);
        assert_eq!(citation.validation.stage, CitationStage::Tier3Done);
        assert_eq!(investigators[0].calls(), 1);

        // Tier 2 is kept, Tier 3 wins for display
        assert_eq!(
            citation.validation.effective_risk(),
            Some((RiskLevel::Low, ReviewSource::Tier3))
        );
    }

    #[tokio::test]
    async fn test_confident_panel_skips_tier3_unless_forced() {
        let (validator, investigators) = validator(&[9.0, 9.0, 9.0], &[4.0, 4.0, 4.0]);

        let mut citation = citation("cit_001", "42 U.S.C. § 1983");
        assert!(!validator.validate(&mut citation, "ctx", false).await);
        assert_eq!(citation.validation.stage, CitationStage::Tier2Done);
        assert_eq!(investigators[0].calls(), 0);

        assert!(validator.validate(&mut citation, "ctx", true).await);
        assert_eq!(
            citation.validation.effective_risk(),
            Some((RiskLevel::NeedsReview, ReviewSource::Tier3))
        );
    }

    #[tokio::test]
    async fn test_rerun_drops_stale_tier3() {
        let (validator, _) = validator(&[9.0, 9.0, 9.0], &[4.0, 4.0, 4.0]);
        let mut citation = citation("cit_001", "42 U.S.C. § 1983");

        validator.validate(&mut citation, "ctx", true).await;
        assert!(citation.validation.tier3.is_some());

        validator.validate(&mut citation, "ctx", false).await;
        assert!(citation.validation.tier3.is_none());
        assert_eq!(
            citation.validation.effective_risk(),
            Some((RiskLevel::Low, ReviewSource::Tier2))
        );
    }
}
