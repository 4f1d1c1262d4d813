//! Run state management.
//!
//! This module provides:
//! - The fixed state schema (`StateKey`, `StateValue`)
//! - The shared state store passed between stages
//! - Summary preferences and refinement records
//! - The per-run execution context

mod identity;
mod preferences;
mod refinement;
mod run;
mod schema;
mod state;

pub use identity::RunIdentity;
pub use preferences::{SummaryFormat, SummaryLength, SummaryPreferences, SummaryStyle};
pub use refinement::RefinementRecord;
pub(crate) use refinement::extract_json_object;
pub use run::RunContext;
pub use schema::{StateKey, StateValue, ValueKind};
pub use state::SharedState;
