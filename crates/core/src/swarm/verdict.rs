//! # Panel Verdicts
//!
//! One agent's opinion about one citation. Panels come in two schemas: the
//! legacy discrete verdict and the current 0-10 score. The schema is carried
//! as an explicit tag so consensus math never has to guess.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest score an agent may return
pub const MIN_SCORE: f64 = 0.0;
/// Highest score an agent may return
pub const MAX_SCORE: f64 = 10.0;

/// Discrete verdict used by legacy panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Valid,
    Invalid,
    Uncertain,
}

impl Verdict {
    /// Lenient parse of an agent's free-form verdict string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" | "correct" | "verified" => Some(Verdict::Valid),
            "invalid" | "incorrect" | "wrong" => Some(Verdict::Invalid),
            "uncertain" | "unknown" | "unsure" => Some(Verdict::Uncertain),
            _ => None,
        }
    }
}

/// The schema an agent answers in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputSchema {
    #[default]
    Score,
    Verdict,
}

/// What the agent actually said
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutput {
    /// Continuous score in [0, 10], higher means more likely correct
    Score { score: f64 },
    /// Legacy discrete verdict
    Verdict { verdict: Verdict },
}

impl AgentOutput {
    pub fn schema(&self) -> OutputSchema {
        match self {
            AgentOutput::Score { .. } => OutputSchema::Score,
            AgentOutput::Verdict { .. } => OutputSchema::Verdict,
        }
    }

    /// Reason this output cannot be used, if any
    pub fn defect(&self) -> Option<String> {
        match self {
            AgentOutput::Score { score } if !score.is_finite() => {
                Some("score is not a finite number".to_string())
            }
            AgentOutput::Score { score } if !(MIN_SCORE..=MAX_SCORE).contains(score) => Some(
                format!("score {} outside [{}, {}]", score, MIN_SCORE, MAX_SCORE),
            ),
            _ => None,
        }
    }
}

/// Token and cost accounting for one agent call
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl TokenUsage {
    /// Rough estimate from character counts (about four characters per token)
    pub fn estimate(input_chars: usize, output_chars: usize, price_per_mtok: (f64, f64)) -> Self {
        let input_tokens = u64::try_from(input_chars / 4).unwrap_or(u64::MAX);
        let output_tokens = u64::try_from(output_chars / 4).unwrap_or(u64::MAX);
        let cost_usd = input_tokens as f64 * price_per_mtok.0 / 1_000_000.0
            + output_tokens as f64 * price_per_mtok.1 / 1_000_000.0;
        Self {
            input_tokens,
            output_tokens,
            cost_usd,
        }
    }

    /// Accumulate; token counts saturate rather than wrap
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cost_usd += other.cost_usd;
    }
}

/// Evidence gathered by a Tier-3 investigator about a cited authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_name: Option<String>,
    /// Whether the lookup found the cited authority
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One agent's recorded opinion. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelVerdict {
    pub agent_id: String,
    pub output: AgentOutput,
    pub reasoning: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub case_links: Vec<CaseLink>,
    pub recorded_at: DateTime<Utc>,
}

impl PanelVerdict {
    pub fn new(agent_id: &str, output: AgentOutput, reasoning: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            output,
            reasoning: reasoning.into(),
            usage: TokenUsage::default(),
            case_links: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn score(agent_id: &str, score: f64, reasoning: impl Into<String>) -> Self {
        Self::new(agent_id, AgentOutput::Score { score }, reasoning)
    }

    pub fn verdict(agent_id: &str, verdict: Verdict, reasoning: impl Into<String>) -> Self {
        Self::new(agent_id, AgentOutput::Verdict { verdict }, reasoning)
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_case_links(mut self, links: Vec<CaseLink>) -> Self {
        self.case_links = links;
        self
    }
}

/// One seat of a panel after evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentSlot {
    Succeeded { verdict: PanelVerdict },
    Failed { agent_id: String, error: String },
}

impl AgentSlot {
    pub fn agent_id(&self) -> &str {
        match self {
            AgentSlot::Succeeded { verdict } => &verdict.agent_id,
            AgentSlot::Failed { agent_id, .. } => agent_id,
        }
    }

    pub fn verdict(&self) -> Option<&PanelVerdict> {
        match self {
            AgentSlot::Succeeded { verdict } => Some(verdict),
            AgentSlot::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentSlot::Succeeded { .. })
    }
}
