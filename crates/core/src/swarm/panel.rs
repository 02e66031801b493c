//! # Panel Evaluator
//!
//! Sends one citation to every agent of a panel at once and collects one slot
//! per agent. Agents are single-blind: each receives the same request and
//! none sees another's answer. A failed, slow or malformed agent only loses
//! its own seat.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use super::consensus::{Consensus, Tier};
use super::verdict::{AgentSlot, PanelVerdict};
use crate::error::AgentError;
use crate::state::document::Citation;

/// What a panel agent is asked to judge
#[derive(Debug, Clone)]
pub struct PanelRequest {
    pub tier: Tier,
    pub citation: Citation,
    /// Surrounding document text, markers stripped
    pub context: String,
    /// Tier-2 consensus, given to Tier-3 investigators for reference
    pub prior: Option<Consensus>,
}

/// A black-box scorer
#[async_trait]
pub trait PanelAgent: Send + Sync {
    fn id(&self) -> &str;

    async fn evaluate(&self, request: &PanelRequest) -> Result<PanelVerdict, AgentError>;
}

/// A fixed panel plus the per-call timeout
#[derive(Clone)]
pub struct PanelEvaluator {
    agents: Vec<Arc<dyn PanelAgent>>,
    timeout: Duration,
}

impl PanelEvaluator {
    pub fn new(agents: Vec<Arc<dyn PanelAgent>>, timeout: Duration) -> Self {
        Self { agents, timeout }
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// One slot per agent, in panel order
    pub async fn evaluate(&self, request: &PanelRequest) -> Vec<AgentSlot> {
        let calls = self.agents.iter().map(|agent| self.seat(agent.as_ref(), request));
        join_all(calls).await
    }

    async fn seat(&self, agent: &dyn PanelAgent, request: &PanelRequest) -> AgentSlot {
        let agent_id = agent.id().to_string();

        let outcome = match tokio::time::timeout(self.timeout, agent.evaluate(request)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                agent_id: agent_id.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
        .and_then(|mut verdict| match verdict.output.defect() {
            Some(reason) => Err(AgentError::MalformedOutput {
                agent_id: agent_id.clone(),
                reason,
            }),
            None => {
                // The panel seat is authoritative for attribution
                verdict.agent_id = agent_id.clone();
                Ok(verdict)
            }
        });

        match outcome {
            Ok(verdict) => AgentSlot::Succeeded { verdict },
            Err(e) => {
                tracing::warn!(
                    agent = %agent_id,
                    citation_id = %request.citation.id,
                    tier = request.tier.as_str(),
                    "Panel agent failed: {}",
                    e
                );
                AgentSlot::Failed {
                    agent_id,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic panel agents for tests

    use super::*;
    use crate::swarm::verdict::{CaseLink, TokenUsage, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Script {
        Score(f64),
        Verdict(Verdict),
        /// Score per citation text fragment, falling back to the default
        ByText(Vec<(String, f64)>, f64),
        Fail,
        Delay(Duration, f64),
    }

    pub struct ScriptedAgent {
        id: String,
        script: Script,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedAgent {
        pub fn new(id: &str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                script,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        /// (citation id, whether a prior consensus was supplied) per call
        pub fn seen(&self) -> Vec<(String, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PanelAgent for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }

        async fn evaluate(&self, request: &PanelRequest) -> Result<PanelVerdict, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((request.citation.id.clone(), request.prior.is_some()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = match &self.script {
                Script::Score(s) => Ok(PanelVerdict::score(&self.id, *s, "scripted")),
                Script::Verdict(v) => Ok(PanelVerdict::verdict(&self.id, *v, "scripted")),
                Script::ByText(table, default) => {
                    let score = table
                        .iter()
                        .find(|(fragment, _)| request.citation.text.contains(fragment.as_str()))
                        .map_or(*default, |(_, s)| *s);
                    Ok(PanelVerdict::score(&self.id, score, "scripted"))
                }
                Script::Fail => Err(AgentError::Call {
                    agent_id: self.id.clone(),
                    reason: "scripted failure".to_string(),
                }),
                Script::Delay(delay, score) => {
                    tokio::time::sleep(*delay).await;
                    Ok(PanelVerdict::score(&self.id, *score, "scripted"))
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            result.map(|v| {
                let v = v.with_usage(TokenUsage {
                    input_tokens: 100,
                    output_tokens: 10,
                    cost_usd: 0.001,
                });
                if request.tier == Tier::Tier3 {
                    v.with_case_links(vec![CaseLink {
                        url: format!("https://example.test/{}", request.citation.id),
                        case_name: None,
                        found: true,
                        note: None,
                    }])
                } else {
                    v
                }
            })
        }
    }

    pub fn panel(agents: &[Arc<ScriptedAgent>], timeout: Duration) -> PanelEvaluator {
        PanelEvaluator::new(
            agents
                .iter()
                .map(|a| a.clone() as Arc<dyn PanelAgent>)
                .collect(),
            timeout,
        )
    }

    pub fn scores(prefix: &str, scores: &[f64]) -> Vec<Arc<ScriptedAgent>> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| ScriptedAgent::new(&format!("{}_{}", prefix, i + 1), Script::Score(*s)))
            .collect()
    }

    pub fn citation(id: &str, text: &str) -> Citation {
        Citation {
            id: id.to_string(),
            text: text.to_string(),
            citation_type: Default::default(),
            paragraph_id: "p_001".to_string(),
            components: Default::default(),
            validation: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::swarm::verdict::AgentOutput;

    fn request() -> PanelRequest {
        PanelRequest {
            tier: Tier::Tier2,
            citation: citation("cit_001", "42 U.S.C. § 1983"),
            context: "Claims arise under 42 U.S.C. § 1983.".to_string(),
            prior: None,
        }
    }

    #[tokio::test]
    async fn test_every_agent_gets_a_slot_in_panel_order() {
        let agents = scores("panelist", &[9.0, 8.0, 7.0]);
        let slots = panel(&agents, Duration::from_secs(5))
            .evaluate(&request())
            .await;

        let ids: Vec<&str> = slots.iter().map(|s| s.agent_id()).collect();
        assert_eq!(ids, vec!["panelist_1", "panelist_2", "panelist_3"]);
        assert!(slots.iter().all(|s| s.is_success()));
        assert!(agents.iter().all(|a| a.calls() == 1));
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_lose_only_their_seat() {
        let agents = vec![
            ScriptedAgent::new("fast", Script::Score(9.0)),
            ScriptedAgent::new("broken", Script::Fail),
            ScriptedAgent::new("slow", Script::Delay(Duration::from_secs(5), 9.0)),
            ScriptedAgent::new("wild", Script::Score(11.0)),
        ];
        let slots = panel(&agents, Duration::from_millis(50))
            .evaluate(&request())
            .await;

        assert!(slots[0].is_success());
        match &slots[1] {
            AgentSlot::Failed { error, .. } => assert!(error.contains("scripted failure")),
            other => panic!("expected failure, got {:?}", other),
        }
        match &slots[2] {
            AgentSlot::Failed { error, .. } => assert!(error.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
        match &slots[3] {
            AgentSlot::Failed { error, .. } => assert!(error.contains("malformed")),
            other => panic!("expected malformed output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agents_run_concurrently() {
        let agents: Vec<_> = (0..4)
            .map(|i| {
                ScriptedAgent::new(
                    &format!("a{}", i),
                    Script::Delay(Duration::from_millis(200), 8.0),
                )
            })
            .collect();
        let started = std::time::Instant::now();
        let slots = panel(&agents, Duration::from_secs(5))
            .evaluate(&request())
            .await;

        assert!(slots.iter().all(|s| s.is_success()));
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_seat_overrides_attribution() {
        struct Impostor;

        #[async_trait]
        impl PanelAgent for Impostor {
            fn id(&self) -> &str {
                "seat_1"
            }

            async fn evaluate(&self, _: &PanelRequest) -> Result<PanelVerdict, AgentError> {
                Ok(PanelVerdict::score("someone_else", 6.0, ""))
            }
        }

        let evaluator = PanelEvaluator::new(vec![Arc::new(Impostor)], Duration::from_secs(1));
        let slots = evaluator.evaluate(&request()).await;
        let verdict = slots[0].verdict().unwrap();
        assert_eq!(verdict.agent_id, "seat_1");
        assert_eq!(verdict.output, AgentOutput::Score { score: 6.0 });
    }
}
