//! Turning stored events and rules into concrete occurrence rows.

pub mod batch;
pub mod materialize;
pub mod resolve;

pub use batch::{BatchReport, regenerate_events};
pub use materialize::{
    DEFAULT_HORIZON_DAYS, ExpansionTrace, MaterializeOptions, MaterializeReport, OccurrencePlan,
    effective_boundary, event_timezone, expansion_params, materialize_event, plan_occurrences,
};
pub use resolve::{AppliedOverride, OverrideSet, ResolvedOccurrence, first_non_empty, resolve_occurrence};
