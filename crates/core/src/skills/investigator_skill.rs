//! # Investigator Skill
//!
//! Tier-3 call: research an escalated citation with the case-law tools and
//! rate it from 0 to 10, listing the sources consulted.

use crate::models::ModelConfig;
use crate::run_llm_worker;
use crate::skills::tools::case_law_tools;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A source the investigator consulted
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct CaseLinkOutput {
    pub url: String,
    #[serde(default)]
    pub case_name: Option<String>,
    /// Whether the source confirmed the citation
    pub found: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Output from the investigator skill
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct InvestigationOutput {
    /// Confidence that the citation is correct and supports the text (0 - 10)
    pub score: f64,
    /// Explanation citing the evidence found
    pub reasoning: String,
    #[serde(default)]
    pub case_links: Vec<CaseLinkOutput>,
}

pub struct InvestigatorSkill;

impl InvestigatorSkill {
    /// Calls the LLM with the case-law tools attached.
    pub async fn run(
        brief: &str,
        system_prompt: &str,
        config: &ModelConfig,
    ) -> anyhow::Result<InvestigationOutput> {
        run_llm_worker!(
            config,
            InvestigationOutput,
            system_prompt,
            brief.to_string(),
            case_law_tools::lookup_case,
            case_law_tools::search_case_law,
        )
    }
}
