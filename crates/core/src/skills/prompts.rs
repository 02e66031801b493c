//! Default prompt templates bundled at compile time.
//!
//! These are used for seeding the database on first run.
//! At runtime, prompts are loaded from the database to allow customization.

/// Slug of the score-schema panelist prompt
pub const SCORER: &str = "scorer";

/// Slug of the legacy verdict-schema panelist prompt
pub const VERDICT: &str = "verdict";

/// Slug of the Tier-3 investigator prompt
pub const INVESTIGATOR: &str = "investigator";

/// Scorer - rates a citation 0 to 10
pub const SCORER_PROMPT: &str = include_str!("defaults/scorer.md");

/// Verdict - VALID / INVALID / UNCERTAIN
pub const VERDICT_PROMPT: &str = include_str!("defaults/verdict.md");

/// Investigator - researches escalated citations with case-law tools
pub const INVESTIGATOR_PROMPT: &str = include_str!("defaults/investigator.md");

/// All default prompts with their slugs for seeding
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        (SCORER, SCORER_PROMPT),
        (VERDICT, VERDICT_PROMPT),
        (INVESTIGATOR, INVESTIGATOR_PROMPT),
    ]
}

pub fn default_for(slug: &str) -> Option<&'static str> {
    all_defaults()
        .into_iter()
        .find(|(s, _)| *s == slug)
        .map(|(_, content)| content)
}
