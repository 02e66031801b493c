//! # Scoring Skill
//!
//! One Tier-2 panelist call: rate a citation from 0 to 10.

use crate::models::ModelConfig;
use crate::run_llm_function;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the scoring skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ScoringOutput {
    /// Confidence that the citation is correct and supports the text (0 - 10)
    pub score: f64,
    /// Short explanation of the score
    pub reasoning: String,
}

pub struct ScoringSkill;

impl ScoringSkill {
    /// `brief` is the rendered citation and context; `system_prompt` is the
    /// scorer template currently stored for the deployment.
    pub async fn run(
        brief: &str,
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<ScoringOutput> {
        run_llm_function!(config, ScoringOutput, system_prompt, brief.to_string())
    }
}
