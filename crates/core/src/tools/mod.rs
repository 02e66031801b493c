//! # Deterministic Tools
//!
//! Rust code that does the parts of citation checking no agent should guess
//! at: finding citations, tracking them across edits, and the marker format
//! they are stored in.
//!
//! ## Modules
//!
//! - `identifier` - Regex citation detector (cases, statutes, regulations, rules)
//! - `markers` - `<cite id="...">` marker parsing and rendering
//! - `reconciler` - Re-identifies an edited paragraph while keeping citation ids stable

pub mod identifier;
pub mod markers;
pub mod reconciler;
