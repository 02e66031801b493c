//! # Radkit-Compatible Tools
//!
//! Tools annotated with `#[tool]` macro for use in Skills.

pub mod case_law_tools;
