//! State persistence module for pipeline coordination
//!
//! This module provides SQLite-backed persistent storage for:
//! - Per-scope state snapshots that let a pipeline resume after a restart
//! - An append-only event log with idempotent, redacted writes
//! - The seeded routing definition (transition table + special rules)
//! - Session rows that own everything above
//!
//! # Architecture
//!
//! One database file in WAL mode, accessed through a small connection pool.
//! Every write is a short `BEGIN IMMEDIATE` transaction; writes to the same
//! `(session, scope)` are also serialized in-process. BUSY/LOCKED results
//! are retried with bounded backoff and surface as retryable contention or
//! timeout errors.
//!
//! - `sessions`: session rows, cascading to their snapshots and events
//! - `state_snapshots`: one row per `(session, scope_type, scope_id)`
//! - `events`: append-only log, unique per idempotency key
//! - `transition_rules`, `special_rules`, `config_meta`: seeded definition
//!
//! # Usage
//!
//! ```ignore
//! use coordination::state::{NewEvent, StateStore, StateUpdate, StateType};
//!
//! let store = StateStore::open(".pipeline/coordination.db")?.shared();
//!
//! store.upsert_state(
//!     &StateUpdate::pending_work_item("s1", "wi-1", serde_json::json!({})),
//!     None,
//! )?;
//!
//! let outcome = store.append_event(
//!     &NewEvent::new("s1", Some("g1"), "status_reported", serde_json::json!({}))
//!         .sequenced(1),
//!     None,
//! )?;
//! ```

pub(crate) mod locks;
pub(crate) mod pool;
pub mod redaction;
pub mod schema;
pub mod store;
pub mod types;

// Re-export core types
pub use locks::RetryPolicy;
pub use redaction::{RedactionError, Redactor};
pub use schema::{MigrationReport, CURRENT_SCHEMA_VERSION};
pub use store::{SharedStateStore, StateStore, StoreConfig, StoreError, StoreResult};
pub use types::{
    idempotency_key, scope_or_global, AppendOutcome, ConfigMeta, EventRecord,
    NewEvent, ScopeId, SessionId, SessionRecord, StateSnapshot, StateType, StateUpdate,
    GLOBAL_SCOPE, SCOPE_FLAGS, TASK_GROUP_SCOPE, WORK_ITEM_SCOPE,
};
