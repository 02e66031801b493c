//! # Validation Swarm
//!
//! Panels of independent agents judge each citation; their answers are
//! reduced to a consensus, and split or middling panels are escalated.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Citation → Tier-2 panel → Consensus ─┬─→ Tier2Done
//!                                      ├─→ Tier2Failed (no quorum)
//!                                      └─→ Tier-3 investigators → Tier3Done | Tier3Failed
//! ```

pub mod agents;
pub mod consensus;
pub mod coordinator;
pub mod escalation;
pub mod events;
pub mod panel;
pub mod pipeline;
pub mod progress;
pub mod validator;
pub mod verdict;

pub use agents::{build_panels, AgentKind, LlmPanelAgent};
pub use consensus::{
    AgreementLevel, Consensus, ConsensusCalculator, ConsensusPolicy, ConsensusStats, RiskLevel,
    Tier, TriggerReason, VerdictCounts,
};
pub use coordinator::{EditOutcome, ReviewDecision, ValidationConfig, ValidationCoordinator};
pub use escalation::{EscalationInvestigator, FinalStatus, Tier3Result};
pub use events::{JobEvent, JobEventKind};
pub use panel::{PanelAgent, PanelEvaluator, PanelRequest};
pub use pipeline::CitationStage;
pub use progress::{JobRegistry, JobTracker};
pub use validator::TierValidator;
pub use verdict::{AgentOutput, AgentSlot, CaseLink, OutputSchema, PanelVerdict, TokenUsage, Verdict};
