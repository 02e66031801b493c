//! # Citecheck Skills
//!
//! LLM calls made by panel agents, and the tools they can use.
//!
//! ```text
//! Panel agent (swarm::agents)
//!   └── Skill (structured LLM call)
//!         └── Tools (#[tool] functions, Tier 3 only)
//! ```
//!
//! - `ScoringSkill` - Tier-2 panelist, 0 to 10 score
//! - `VerdictSkill` - Tier-2 panelist, legacy VALID / INVALID / UNCERTAIN
//! - `InvestigatorSkill` - Tier-3 investigator with case-law lookups

pub mod llm_helpers;
pub mod prompts;
pub mod tools;

pub mod investigator_skill;
pub mod scoring_skill;
pub mod verdict_skill;

pub use investigator_skill::{CaseLinkOutput, InvestigationOutput, InvestigatorSkill};
pub use scoring_skill::{ScoringOutput, ScoringSkill};
pub use verdict_skill::{VerdictOutput, VerdictSkill};
