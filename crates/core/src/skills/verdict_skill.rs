//! # Verdict Skill
//!
//! Panelist call for the legacy discrete schema: VALID, INVALID or UNCERTAIN.

use crate::models::ModelConfig;
use crate::run_llm_function;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output from the verdict skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct VerdictOutput {
    /// Exactly one of "VALID", "INVALID", "UNCERTAIN"
    pub verdict: String,
    /// Short explanation of the verdict
    pub reasoning: String,
}

pub struct VerdictSkill;

impl VerdictSkill {
    pub async fn run(
        brief: &str,
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<VerdictOutput> {
        run_llm_function!(config, VerdictOutput, system_prompt, brief.to_string())
    }
}
