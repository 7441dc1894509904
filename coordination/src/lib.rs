//! Pipeline Coordination Library
//!
//! Deterministic role routing and a resumable state/event store for
//! multi-role task pipelines. A driver loop reports `(role, status)` after
//! each unit of work; the coordinator answers with the next role and action
//! and records everything it decided so a crashed pipeline can resume.
//!
//! # Modules
//!
//! - [`table`]: transition rules and the validated lookup table
//! - [`escalation`]: special rules (failure escalation, sensitivity,
//!   degraded bypass, parallel cap, fallbacks) as typed policy
//! - [`router`]: the stateless evaluator producing [`RouterDecision`]s
//! - [`state`]: SQLite store for snapshots, the event log and the seeded definition
//! - [`loader`]: definition documents, the versioned catalog, validation
//! - [`events`]: event vocabulary, replay and audit statistics
//! - [`coordinator`]: the `seed` / `route` / `record` facade
//!
//! # Usage
//!
//! ```ignore
//! use coordination::{CoordinationConfig, PipelineCoordinator, RouteRequest};
//!
//! let coord = PipelineCoordinator::open(&CoordinationConfig::from_env())?;
//! coord.start_session("s1", "pipeline-v1")?;
//!
//! let report = coord.route(&RouteRequest::new("s1", Some("g1"), "developer", "done"))?;
//! println!("next: {:?}", report.decision().next_role);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod escalation;
pub mod events;
pub mod loader;
pub mod router;
pub mod state;
pub mod table;

pub use config::CoordinationConfig;
pub use coordinator::{PipelineCoordinator, RouteReport, RouteSummary};
pub use error::{CoordinationError, CoordinationResult, StructuredError};
pub use escalation::{EscalationPolicy, OverrideKind, SpecialRule};
pub use events::{EventHistory, EventStats};
pub use loader::{
    ConfigError, DefinitionCatalog, DefinitionFormat, PipelineDefinition, SeedReport,
    SpecialRulesDoc, TransitionTableDoc,
};
pub use router::{
    AppliedOverride, ChainState, RouteOutcome, RouteRequest, Router, RouterDecision,
    RoutingContext, RoutingTable, StoreContext, UnknownKind, UnknownTransitionError,
};
pub use state::{
    AppendOutcome, EventRecord, NewEvent, SharedStateStore, StateSnapshot, StateStore,
    StateType, StateUpdate, StoreConfig, StoreError,
};
pub use table::{Action, TableError, ThenAction, TransitionRule, TransitionTable};
