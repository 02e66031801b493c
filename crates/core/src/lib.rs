//! # Citecheck Core
//!
//! Citation identification, paragraph reconciliation, and tiered panel
//! validation for legal documents.
//!
//! ## Architecture
//!
//! - `tools/` - Deterministic machinery: citation identifier, marker codec, paragraph reconciler
//! - `swarm/` - Panels, consensus, escalation and the validation coordinator
//! - `skills/` - LLM calls behind each panel seat
//! - `state/` - Document model, snapshot store, job records, SQLite
//! - `models` - LLM provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use citecheck_core::state::CitecheckDb;
//! use citecheck_core::swarm::{ValidationConfig, ValidationCoordinator};
//!
//! let db = CitecheckDb::open()?;
//! let coordinator = ValidationCoordinator::from_config(ValidationConfig::default(), &db);
//! let check = coordinator.create_check("Brief", &paragraphs).await?;
//! coordinator.identify_citations(&check.check_id).await?;
//! let job = coordinator.validate_now(&check.check_id, false).await?;
//! ```

pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

pub use error::{AgentError, CheckError, CheckResult};
