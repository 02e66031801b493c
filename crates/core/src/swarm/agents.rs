//! # LLM Panel Agents
//!
//! The production [`PanelAgent`]: one seat backed by an LLM skill. Panels are
//! assembled from [`ValidationConfig`], each seat resolving its own model.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::coordinator::ValidationConfig;
use super::panel::{PanelAgent, PanelEvaluator, PanelRequest};
use super::verdict::{CaseLink, OutputSchema, PanelVerdict, TokenUsage, Verdict};
use crate::error::AgentError;
use crate::models::ModelConfig;
use crate::skills::{prompts, InvestigatorSkill, ScoringSkill, VerdictSkill};
use crate::state::db::CitecheckDb;

/// Which skill a seat runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Scorer,
    Verdict,
    Investigator,
}

impl AgentKind {
    pub fn prompt_slug(&self) -> &'static str {
        match self {
            AgentKind::Scorer => prompts::SCORER,
            AgentKind::Verdict => prompts::VERDICT,
            AgentKind::Investigator => prompts::INVESTIGATOR,
        }
    }
}

pub struct LlmPanelAgent {
    id: String,
    kind: AgentKind,
    model: ModelConfig,
    /// Customised prompts; bundled defaults when absent
    db: Option<CitecheckDb>,
}

impl LlmPanelAgent {
    pub fn new(id: &str, kind: AgentKind, model: ModelConfig, db: Option<CitecheckDb>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            model,
            db,
        }
    }

    fn system_prompt(&self) -> String {
        let slug = self.kind.prompt_slug();
        if let Some(db) = &self.db {
            match db.get_prompt(slug) {
                Ok(content) => return content,
                Err(e) => tracing::debug!(slug, "Using bundled prompt: {:#}", e),
            }
        }
        prompts::default_for(slug).unwrap_or_default().to_string()
    }

    fn call_error(&self, err: anyhow::Error) -> AgentError {
        AgentError::Call {
            agent_id: self.id.clone(),
            reason: format!("{:#}", err),
        }
    }
}

/// Text the agent is asked to judge
pub fn render_brief(request: &PanelRequest) -> String {
    let citation = &request.citation;
    let mut brief = format!(
        "Citation ID: {}\nCitation: {}\nType: {:?}\n",
        citation.id, citation.text, citation.citation_type
    );
    if let Ok(components) = serde_json::to_string(&citation.components) {
        brief.push_str(&format!("Components: {}\n", components));
    }
    brief.push_str(&format!("\nDocument context:\n{}\n", request.context));

    if let Some(prior) = &request.prior {
        brief.push_str(&format!(
            "\nFirst panel consensus:\n- recommendation: {:?}\n- agreement: {:?}\n- successful agents: {}\n",
            prior.recommendation, prior.agreement, prior.successful_agents
        ));
        if let Some(avg) = prior.average_score() {
            brief.push_str(&format!("- average score: {:.2}\n", avg));
        }
        if !prior.trigger_reasons.is_empty() {
            brief.push_str(&format!("- escalated because: {:?}\n", prior.trigger_reasons));
        }
    }
    brief
}

#[async_trait]
impl PanelAgent for LlmPanelAgent {
    fn id(&self) -> &str {
        &self.id
    }

    #[tracing::instrument(skip(self, request), fields(agent = %self.id, citation_id = %request.citation.id))]
    async fn evaluate(&self, request: &PanelRequest) -> Result<PanelVerdict, AgentError> {
        let brief = render_brief(request);
        let system_prompt = self.system_prompt();
        let input_chars = brief.len() + system_prompt.len();
        let price = self.model.provider.price_per_mtok();

        let verdict = match self.kind {
            AgentKind::Scorer => {
                let out = ScoringSkill::run(&brief, &system_prompt, &self.model)
                    .await
                    .map_err(|e| self.call_error(e))?;
                let usage = TokenUsage::estimate(input_chars, out.reasoning.len() + 16, price);
                PanelVerdict::score(&self.id, out.score, out.reasoning).with_usage(usage)
            }
            AgentKind::Verdict => {
                let out = VerdictSkill::run(&brief, &system_prompt, &self.model)
                    .await
                    .map_err(|e| self.call_error(e))?;
                let verdict =
                    Verdict::parse(&out.verdict).ok_or_else(|| AgentError::MalformedOutput {
                        agent_id: self.id.clone(),
                        reason: format!("unknown verdict '{}'", out.verdict),
                    })?;
                let usage = TokenUsage::estimate(input_chars, out.reasoning.len() + 16, price);
                PanelVerdict::verdict(&self.id, verdict, out.reasoning).with_usage(usage)
            }
            AgentKind::Investigator => {
                let out = InvestigatorSkill::run(&brief, &system_prompt, &self.model)
                    .await
                    .map_err(|e| self.call_error(e))?;
                let links: Vec<CaseLink> = out
                    .case_links
                    .into_iter()
                    .map(|l| CaseLink {
                        url: l.url,
                        case_name: l.case_name,
                        found: l.found,
                        note: l.note,
                    })
                    .collect();
                let output_chars = out.reasoning.len()
                    + links.iter().map(|l| l.url.len() + 32).sum::<usize>();
                let usage = TokenUsage::estimate(input_chars, output_chars, price);
                PanelVerdict::score(&self.id, out.score, out.reasoning)
                    .with_usage(usage)
                    .with_case_links(links)
            }
        };

        tracing::debug!(model = %self.model.label(), "Panel agent answered");
        Ok(verdict)
    }
}

/// Build the Tier-2 and Tier-3 panels described by `config`
pub fn build_panels(config: &ValidationConfig, db: Option<&CitecheckDb>) -> (PanelEvaluator, PanelEvaluator) {
    let tier2_kind = match config.tier2_schema {
        OutputSchema::Score => AgentKind::Scorer,
        OutputSchema::Verdict => AgentKind::Verdict,
    };
    let seat = |id: &String, kind: AgentKind| -> Arc<dyn PanelAgent> {
        Arc::new(LlmPanelAgent::new(
            id,
            kind,
            config.model_config_for(id),
            db.cloned(),
        ))
    };

    let tier2 = config.tier2_agents.iter().map(|id| seat(id, tier2_kind)).collect();
    let tier3 = config
        .tier3_agents
        .iter()
        .map(|id| seat(id, AgentKind::Investigator))
        .collect();

    (
        PanelEvaluator::new(tier2, Duration::from_secs(config.agent_timeout_secs)),
        PanelEvaluator::new(tier3, Duration::from_secs(config.tier3_timeout_secs)),
    )
}
