//! # Consensus Calculator
//!
//! Aggregates one panel's verdicts into a single consensus record.
//!
//! The calculation is a pure function of `(tier, slots, policy)`: no clock,
//! no randomness, no hash-map iteration order. Re-running it on the same
//! slots yields byte-identical JSON, which is what makes re-running Tier 2
//! side-effect free.
//!
//! ## Escalation trigger
//!
//! For score panels the trigger fires when the mean lands in the moderate
//! band **or** when the spread exceeds the dispersion threshold. A single
//! outlier agent therefore escalates a citation even when the mean is high.
//! For legacy verdict panels the trigger fires whenever the vote is not
//! unanimous.

use serde::{Deserialize, Serialize};

use super::verdict::{AgentOutput, AgentSlot, OutputSchema, TokenUsage, Verdict};
use crate::error::QuorumError;

/// Mean at or above which a citation is low risk
pub const LOW_RISK_THRESHOLD: f64 = 8.0;
/// Mean at or above which (and below `LOW_RISK_THRESHOLD`) a citation is moderate risk
pub const MODERATE_RISK_THRESHOLD: f64 = 5.0;

/// Standard deviation at or below which agreement is high
const HIGH_AGREEMENT_MAX_SD: f64 = 1.0;
/// Standard deviation at or below which agreement is moderate
const MODERATE_AGREEMENT_MAX_SD: f64 = 2.0;

/// Which panel produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier2,
    Tier3,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
        }
    }
}

/// Risk classification shown to reviewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    NeedsReview,
}

impl RiskLevel {
    /// Bucket a mean score. Buckets partition [0, 10] at 5 and 8.
    pub fn from_average(average: f64) -> Self {
        if average >= LOW_RISK_THRESHOLD {
            RiskLevel::Low
        } else if average >= MODERATE_RISK_THRESHOLD {
            RiskLevel::Moderate
        } else {
            RiskLevel::NeedsReview
        }
    }

    /// Legacy majority verdict to risk
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Valid => RiskLevel::Low,
            Verdict::Uncertain => RiskLevel::Moderate,
            Verdict::Invalid => RiskLevel::NeedsReview,
        }
    }
}

/// Categorical summary of how much the panel agreed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    High,
    Moderate,
    Low,
    /// No quorum, nothing to agree about
    Insufficient,
}

impl AgreementLevel {
    pub fn from_standard_deviation(sd: f64) -> Self {
        if sd <= HIGH_AGREEMENT_MAX_SD {
            AgreementLevel::High
        } else if sd <= MODERATE_AGREEMENT_MAX_SD {
            AgreementLevel::Moderate
        } else {
            AgreementLevel::Low
        }
    }
}

/// Why escalation fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Mean score fell in the moderate band
    ModerateMean,
    /// Standard deviation exceeded the dispersion threshold
    Dispersion,
    /// Legacy vote was not unanimous
    SplitVote,
}

/// Vote tallies for legacy panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub valid: usize,
    pub invalid: usize,
    pub uncertain: usize,
}

impl VerdictCounts {
    pub fn total(&self) -> usize {
        self.valid + self.invalid + self.uncertain
    }

    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Valid => self.valid += 1,
            Verdict::Invalid => self.invalid += 1,
            Verdict::Uncertain => self.uncertain += 1,
        }
    }

    /// Plurality winner; any tie for first place resolves to `Uncertain`
    pub fn majority(&self) -> Verdict {
        let ranked = [
            (Verdict::Valid, self.valid),
            (Verdict::Invalid, self.invalid),
            (Verdict::Uncertain, self.uncertain),
        ];
        let top = ranked.iter().map(|(_, c)| *c).max().unwrap_or(0);
        let leaders: Vec<Verdict> = ranked
            .iter()
            .filter(|(_, c)| *c == top)
            .map(|(v, _)| *v)
            .collect();
        if leaders.len() == 1 {
            leaders[0]
        } else {
            Verdict::Uncertain
        }
    }

    pub fn is_unanimous(&self) -> bool {
        let total = self.total();
        total > 0 && [self.valid, self.invalid, self.uncertain].contains(&total)
    }
}

/// Schema-specific statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum ConsensusStats {
    Score {
        average_score: f64,
        standard_deviation: f64,
        variance: f64,
        scores: Vec<f64>,
    },
    Verdict {
        verdict_counts: VerdictCounts,
        majority: Verdict,
    },
    /// Quorum not met; the citation needs review by policy
    Insufficient { successful: usize, required: usize },
}

/// Aggregated, derived judgment of one panel. Never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub tier: Tier,
    pub agreement: AgreementLevel,
    pub stats: ConsensusStats,
    pub recommendation: RiskLevel,
    pub tier_3_trigger: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_reasons: Vec<TriggerReason>,
    pub successful_agents: usize,
    pub failed_agents: usize,
    pub quorum_met: bool,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl Consensus {
    pub fn average_score(&self) -> Option<f64> {
        match &self.stats {
            ConsensusStats::Score { average_score, .. } => Some(*average_score),
            _ => None,
        }
    }

    pub fn quorum_error(&self) -> Option<QuorumError> {
        match self.stats {
            ConsensusStats::Insufficient {
                successful,
                required,
            } => Some(QuorumError {
                successful,
                required,
            }),
            _ => None,
        }
    }
}

/// Tunables for the calculator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    /// Minimum successful verdicts needed to compute a consensus
    pub min_quorum: usize,
    /// Standard deviation above which the panel is considered split
    pub dispersion_threshold: f64,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            min_quorum: 3,
            dispersion_threshold: 2.0,
        }
    }
}

/// Pure consensus calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusCalculator {
    policy: ConsensusPolicy,
}

impl ConsensusCalculator {
    pub fn new(policy: ConsensusPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ConsensusPolicy {
        &self.policy
    }

    /// Compute the consensus for one panel run.
    ///
    /// The panel schema is taken from the first successful verdict; verdicts
    /// in the other schema, and defective scores, count as failed seats.
    pub fn calculate(&self, tier: Tier, slots: &[AgentSlot]) -> Consensus {
        let mut usage = TokenUsage::default();
        let mut schema: Option<OutputSchema> = None;
        let mut scores = Vec::new();
        let mut counts = VerdictCounts::default();
        let mut failed = 0usize;

        for slot in slots {
            let Some(verdict) = slot.verdict() else {
                failed += 1;
                continue;
            };
            usage.add(&verdict.usage);

            if verdict.output.defect().is_some() {
                failed += 1;
                continue;
            }
            let panel_schema = *schema.get_or_insert(verdict.output.schema());
            match (&verdict.output, panel_schema) {
                (AgentOutput::Score { score }, OutputSchema::Score) => scores.push(*score),
                (AgentOutput::Verdict { verdict }, OutputSchema::Verdict) => counts.record(*verdict),
                _ => failed += 1,
            }
        }

        let successful = scores.len() + counts.total();
        let required = self.policy.min_quorum.max(1);
        if successful < required {
            return Consensus {
                tier,
                agreement: AgreementLevel::Insufficient,
                stats: ConsensusStats::Insufficient {
                    successful,
                    required,
                },
                recommendation: RiskLevel::NeedsReview,
                tier_3_trigger: false,
                trigger_reasons: Vec::new(),
                successful_agents: successful,
                failed_agents: failed,
                quorum_met: false,
                usage,
            };
        }

        match schema.unwrap_or_default() {
            OutputSchema::Score => self.score_consensus(tier, scores, failed, usage),
            OutputSchema::Verdict => self.verdict_consensus(tier, counts, failed, usage),
        }
    }

    fn score_consensus(
        &self,
        tier: Tier,
        scores: Vec<f64>,
        failed: usize,
        usage: TokenUsage,
    ) -> Consensus {
        let n = scores.len() as f64;
        let average = (scores.iter().sum::<f64>() / n).clamp(0.0, 10.0);
        let variance = scores.iter().map(|s| (s - average).powi(2)).sum::<f64>() / n;
        let standard_deviation = variance.sqrt();
        let recommendation = RiskLevel::from_average(average);

        let mut trigger_reasons = Vec::new();
        if recommendation == RiskLevel::Moderate {
            trigger_reasons.push(TriggerReason::ModerateMean);
        }
        if standard_deviation > self.policy.dispersion_threshold {
            trigger_reasons.push(TriggerReason::Dispersion);
        }

        Consensus {
            tier,
            agreement: AgreementLevel::from_standard_deviation(standard_deviation),
            successful_agents: scores.len(),
            stats: ConsensusStats::Score {
                average_score: average,
                standard_deviation,
                variance,
                scores,
            },
            recommendation,
            tier_3_trigger: !trigger_reasons.is_empty(),
            trigger_reasons,
            failed_agents: failed,
            quorum_met: true,
            usage,
        }
    }

    fn verdict_consensus(
        &self,
        tier: Tier,
        counts: VerdictCounts,
        failed: usize,
        usage: TokenUsage,
    ) -> Consensus {
        let majority = counts.majority();
        let unanimous = counts.is_unanimous();
        let top = counts.valid.max(counts.invalid).max(counts.uncertain);

        let agreement = if unanimous {
            AgreementLevel::High
        } else if top * 2 > counts.total() {
            AgreementLevel::Moderate
        } else {
            AgreementLevel::Low
        };

        let trigger_reasons = if unanimous {
            Vec::new()
        } else {
            vec![TriggerReason::SplitVote]
        };

        Consensus {
            tier,
            agreement,
            stats: ConsensusStats::Verdict {
                verdict_counts: counts,
                majority,
            },
            recommendation: RiskLevel::from_verdict(majority),
            tier_3_trigger: !unanimous,
            trigger_reasons,
            successful_agents: counts.total(),
            failed_agents: failed,
            quorum_met: true,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::verdict::PanelVerdict;

    fn score_slots(scores: &[f64]) -> Vec<AgentSlot> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| AgentSlot::Succeeded {
                verdict: PanelVerdict::score(&format!("panelist_{}", i + 1), *s, "checked"),
            })
            .collect()
    }

    fn verdict_slots(verdicts: &[Verdict]) -> Vec<AgentSlot> {
        verdicts
            .iter()
            .enumerate()
            .map(|(i, v)| AgentSlot::Succeeded {
                verdict: PanelVerdict::verdict(&format!("panelist_{}", i + 1), *v, "checked"),
            })
            .collect()
    }

    fn failed_slot(agent: &str) -> AgentSlot {
        AgentSlot::Failed {
            agent_id: agent.to_string(),
            error: "timed out".to_string(),
        }
    }

    #[test]
    fn test_outlier_triggers_escalation_despite_acceptable_mean() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(Tier::Tier2, &score_slots(&[9.0, 9.0, 8.0, 2.0, 9.0]));

        let avg = consensus.average_score().unwrap();
        assert!((avg - 7.4).abs() < 1e-9);
        assert_eq!(consensus.recommendation, RiskLevel::Moderate);
        assert!(consensus.tier_3_trigger);
        assert!(consensus.trigger_reasons.contains(&TriggerReason::ModerateMean));
        assert!(consensus.trigger_reasons.contains(&TriggerReason::Dispersion));
        assert_eq!(consensus.agreement, AgreementLevel::Low);
    }

    #[test]
    fn test_dispersion_alone_triggers_on_high_mean() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(Tier::Tier2, &score_slots(&[10.0, 10.0, 10.0, 10.0, 3.0]));

        assert!(consensus.average_score().unwrap() >= LOW_RISK_THRESHOLD);
        assert_eq!(consensus.recommendation, RiskLevel::Low);
        assert!(consensus.tier_3_trigger);
        assert_eq!(consensus.trigger_reasons, vec![TriggerReason::Dispersion]);
    }

    #[test]
    fn test_tight_high_panel_does_not_trigger() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(Tier::Tier2, &score_slots(&[9.0, 8.5, 9.5, 9.0, 8.0]));

        assert_eq!(consensus.recommendation, RiskLevel::Low);
        assert_eq!(consensus.agreement, AgreementLevel::High);
        assert!(!consensus.tier_3_trigger);
    }

    #[test]
    fn test_low_mean_needs_review_without_escalation() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(Tier::Tier2, &score_slots(&[2.0, 3.0, 2.5]));

        assert_eq!(consensus.recommendation, RiskLevel::NeedsReview);
        assert!(!consensus.tier_3_trigger);
    }

    #[test]
    fn test_buckets_partition_exactly_at_thresholds() {
        assert_eq!(RiskLevel::from_average(8.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_average(7.999_999), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_average(5.0), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_average(4.999_999), RiskLevel::NeedsReview);
        assert_eq!(RiskLevel::from_average(0.0), RiskLevel::NeedsReview);
        assert_eq!(RiskLevel::from_average(10.0), RiskLevel::Low);

        // Every point on a fine grid lands in exactly one bucket
        for step in 0..=1000 {
            let avg = step as f64 / 100.0;
            let expected = if avg >= 8.0 {
                RiskLevel::Low
            } else if avg >= 5.0 {
                RiskLevel::Moderate
            } else {
                RiskLevel::NeedsReview
            };
            assert_eq!(RiskLevel::from_average(avg), expected, "avg={}", avg);
        }
    }

    #[test]
    fn test_average_stays_in_range() {
        let calc = ConsensusCalculator::default();
        for scores in [
            vec![0.0, 0.0, 0.0],
            vec![10.0, 10.0, 10.0],
            vec![0.0, 10.0, 5.0, 7.3],
            vec![0.1, 9.9, 4.4, 6.6, 3.3],
        ] {
            let avg = calc
                .calculate(Tier::Tier2, &score_slots(&scores))
                .average_score()
                .unwrap();
            assert!((0.0..=10.0).contains(&avg));
        }
    }

    #[test]
    fn test_deterministic_serialization() {
        let calc = ConsensusCalculator::default();
        let slots = score_slots(&[7.0, 8.0, 6.5, 9.0]);

        let first = serde_json::to_string(&calc.calculate(Tier::Tier2, &slots)).unwrap();
        let second = serde_json::to_string(&calc.calculate(Tier::Tier2, &slots)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_agents_excluded_from_math() {
        let calc = ConsensusCalculator::default();
        let mut slots = score_slots(&[9.0, 9.0, 9.0]);
        slots.push(failed_slot("panelist_4"));
        slots.push(failed_slot("panelist_5"));

        let consensus = calc.calculate(Tier::Tier2, &slots);
        assert!(consensus.quorum_met);
        assert_eq!(consensus.successful_agents, 3);
        assert_eq!(consensus.failed_agents, 2);
        assert_eq!(consensus.average_score(), Some(9.0));
    }

    #[test]
    fn test_below_quorum_needs_review_by_policy() {
        let calc = ConsensusCalculator::default();
        let mut slots = score_slots(&[9.0, 9.0]);
        slots.push(failed_slot("panelist_3"));

        let consensus = calc.calculate(Tier::Tier2, &slots);
        assert!(!consensus.quorum_met);
        assert_eq!(consensus.recommendation, RiskLevel::NeedsReview);
        assert_eq!(consensus.agreement, AgreementLevel::Insufficient);
        assert!(!consensus.tier_3_trigger);
        assert_eq!(
            consensus.quorum_error(),
            Some(QuorumError {
                successful: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_defective_scores_count_as_failed() {
        let calc = ConsensusCalculator::default();
        let slots = score_slots(&[9.0, 9.0, 9.0, 42.0]);

        let consensus = calc.calculate(Tier::Tier2, &slots);
        assert_eq!(consensus.successful_agents, 3);
        assert_eq!(consensus.failed_agents, 1);
    }

    #[test]
    fn test_legacy_majority_and_split_trigger() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(
            Tier::Tier2,
            &verdict_slots(&[Verdict::Valid, Verdict::Valid, Verdict::Invalid]),
        );

        match &consensus.stats {
            ConsensusStats::Verdict { majority, verdict_counts } => {
                assert_eq!(*majority, Verdict::Valid);
                assert_eq!(verdict_counts.invalid, 1);
            }
            other => panic!("unexpected stats: {:?}", other),
        }
        assert_eq!(consensus.recommendation, RiskLevel::Low);
        assert_eq!(consensus.agreement, AgreementLevel::Moderate);
        assert!(consensus.tier_3_trigger);
        assert_eq!(consensus.trigger_reasons, vec![TriggerReason::SplitVote]);
    }

    #[test]
    fn test_legacy_tie_breaks_to_uncertain() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(
            Tier::Tier2,
            &verdict_slots(&[
                Verdict::Valid,
                Verdict::Valid,
                Verdict::Invalid,
                Verdict::Invalid,
            ]),
        );

        match &consensus.stats {
            ConsensusStats::Verdict { majority, .. } => assert_eq!(*majority, Verdict::Uncertain),
            other => panic!("unexpected stats: {:?}", other),
        }
        assert_eq!(consensus.agreement, AgreementLevel::Low);
    }

    #[test]
    fn test_legacy_unanimous_does_not_trigger() {
        let calc = ConsensusCalculator::default();
        let consensus = calc.calculate(
            Tier::Tier2,
            &verdict_slots(&[Verdict::Valid, Verdict::Valid, Verdict::Valid]),
        );
        assert!(!consensus.tier_3_trigger);
        assert_eq!(consensus.agreement, AgreementLevel::High);
    }

    #[test]
    fn test_mixed_schema_uses_first_schema() {
        let calc = ConsensusCalculator::default();
        let mut slots = score_slots(&[9.0, 9.0, 9.0]);
        slots.push(AgentSlot::Succeeded {
            verdict: PanelVerdict::verdict("legacy", Verdict::Invalid, "no"),
        });

        let consensus = calc.calculate(Tier::Tier2, &slots);
        assert_eq!(consensus.successful_agents, 3);
        assert_eq!(consensus.failed_agents, 1);
        assert!(matches!(consensus.stats, ConsensusStats::Score { .. }));
    }
}
