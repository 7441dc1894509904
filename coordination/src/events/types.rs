//! Well-known event types written to the event log.
//!
//! Callers may record arbitrary event types; these are the ones the
//! coordinator itself writes or gives special meaning to.

/// A routing decision produced by the router. Payload: `RouterDecision`.
pub const ROUTING_DECISION: &str = "routing_decision";

/// A fallback decision for a `(role, status)` the table does not know.
pub const UNKNOWN_TRANSITION: &str = "unknown_transition";

/// A role reported a status for a scope.
pub const STATUS_REPORTED: &str = "status_reported";

/// The pipeline reached its end. Accepted only after a completing decision.
pub const PIPELINE_COMPLETED: &str = "pipeline_completed";

/// A scope's sensitivity flag changed.
pub const SENSITIVITY_FLAGGED: &str = "sensitivity_flagged";

/// A routing definition was seeded for a session.
pub const DEFINITION_SEEDED: &str = "definition_seeded";

/// Event types that carry a `RouterDecision` payload.
pub const DECISION_EVENT_TYPES: &[&str] = &[ROUTING_DECISION, UNKNOWN_TRANSITION];

pub fn is_decision_event(event_type: &str) -> bool {
    DECISION_EVENT_TYPES.contains(&event_type)
}
