//! Pipeline Router Module
//!
//! Maps a `(role, status, mode)` report to the next role and action, using
//! the seeded transition table plus the escalation policy.
//!
//! # Override Precedence
//!
//! ```text
//! Stage               | Replaces next role with      | Notes
//! --------------------|------------------------------|---------------------------
//! Degraded bypass     | pass transition of skipped   | repeated until stable
//! Failure escalation  | escalation role              | first matching rule by name
//! Sensitivity         | force role (+ review role)   | skipped after escalation
//! Chain / batch       | all-complete role or batch   | skipped after either above
//! ```

pub mod context;
pub mod decision;
pub mod evaluator;

pub use context::{RoutingContext, StoreContext};
pub use decision::{
    AppliedOverride, ChainState, RouteOutcome, RouteRequest, RouterDecision, UnknownKind,
    UnknownTransitionError, NORMAL_MODE,
};
pub use evaluator::{Router, RoutingTable, FAILURE_HISTORY_CONTEXT, SENSITIVITY_CONTEXT};
