//! Event log vocabulary and read-side history
//!
//! Writes go through the state store (`append_event`,
//! `atomic_state_and_event`), which redacts and deduplicates. This module
//! names the event types the coordinator gives meaning to and provides
//! replay and statistics over what was written.
//!
//! # Event Flow
//!
//! ```text
//! ┌────────────────┐     ┌────────────────┐     ┌────────────────┐
//! │ Caller/Router  │────▶│    Redactor    │────▶│ events (SQLite)│
//! └────────────────┘     │ (fail-closed)  │     └───────┬────────┘
//!                        └────────────────┘             │
//!                                                       ▼
//!                                               ┌────────────────┐
//!                                               │  EventHistory  │
//!                                               │ (replay/stats) │
//!                                               └────────────────┘
//! ```

pub mod history;
pub mod types;

pub use history::{EventHistory, EventStats, HistoryError, HistoryResult, ReplayBuilder, ReplayStats};
pub use types::{
    is_decision_event, DEFINITION_SEEDED, PIPELINE_COMPLETED, ROUTING_DECISION,
    SENSITIVITY_FLAGGED, STATUS_REPORTED, UNKNOWN_TRANSITION,
};
