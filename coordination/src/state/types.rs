//! Core types for pipeline state persistence
//!
//! These types mirror the rows of the SQLite store: per-scope state
//! snapshots, the append-only event log, sessions, and seed metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for pipeline sessions
pub type SessionId = String;

/// Scope identifier (task group, work item, ...)
pub type ScopeId = String;

/// Scope id used when an operation is session-wide.
pub const GLOBAL_SCOPE: &str = "global";

/// Scope type of queued work items.
pub const WORK_ITEM_SCOPE: &str = "work_item";

/// Scope type of per-scope routing flags (sensitivity).
pub const SCOPE_FLAGS: &str = "scope_flags";

/// Scope type of task groups.
pub const TASK_GROUP_SCOPE: &str = "task_group";

/// Normalize an optional scope id. Absent or blank scopes map to [`GLOBAL_SCOPE`].
pub fn scope_or_global(scope_id: Option<&str>) -> &str {
    match scope_id {
        Some(s) if !s.trim().is_empty() => s,
        _ => GLOBAL_SCOPE,
    }
}

/// Deterministic idempotency key for a sequenced event.
pub fn idempotency_key(session_id: &str, scope_id: &str, event_type: &str, sequence: u64) -> String {
    format!("{session_id}|{scope_id}|{event_type}|{sequence}")
}

/// Lifecycle state of a scope snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StateType {
    Pending,
    InProgress,
    Complete,
    Blocked,
    Flags,
    Other(String),
}

impl StateType {
    pub fn as_str(&self) -> &str {
        match self {
            StateType::Pending => "pending",
            StateType::InProgress => "in_progress",
            StateType::Complete => "complete",
            StateType::Blocked => "blocked",
            StateType::Flags => "flags",
            StateType::Other(s) => s,
        }
    }
}

impl From<&str> for StateType {
    fn from(s: &str) -> Self {
        match s {
            "pending" => StateType::Pending,
            "in_progress" => StateType::InProgress,
            "complete" => StateType::Complete,
            "blocked" => StateType::Blocked,
            "flags" => StateType::Flags,
            other => StateType::Other(other.to_string()),
        }
    }
}

impl From<String> for StateType {
    fn from(s: String) -> Self {
        StateType::from(s.as_str())
    }
}

impl From<StateType> for String {
    fn from(s: StateType) -> Self {
        s.as_str().to_string()
    }
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upsert request for one scope snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub session_id: SessionId,
    pub scope_type: String,
    pub scope_id: ScopeId,
    pub state_type: StateType,
    pub payload: serde_json::Value,
}

impl StateUpdate {
    pub fn new(
        session_id: impl Into<String>,
        scope_type: impl Into<String>,
        scope_id: Option<&str>,
        state_type: impl Into<StateType>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scope_type: scope_type.into(),
            scope_id: scope_or_global(scope_id).to_string(),
            state_type: state_type.into(),
            payload,
        }
    }

    /// Queue a work item as pending.
    pub fn pending_work_item(
        session_id: impl Into<String>,
        item_id: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(
            session_id,
            WORK_ITEM_SCOPE,
            Some(item_id),
            StateType::Pending,
            payload,
        )
    }
}

/// Stored scope snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: i64,
    pub session_id: SessionId,
    pub scope_type: String,
    pub scope_id: ScopeId,
    pub state_type: StateType,
    pub state_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append request for the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub session_id: SessionId,
    pub scope_id: ScopeId,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl NewEvent {
    pub fn new(
        session_id: impl Into<String>,
        scope_id: Option<&str>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scope_id: scope_or_global(scope_id).to_string(),
            event_type: event_type.into(),
            payload,
            idempotency_key: None,
            sequence: None,
        }
    }

    /// Attach an explicit idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach a per-scope sequence number; derives the idempotency key from it.
    pub fn sequenced(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self.idempotency_key = Some(idempotency_key(
            &self.session_id,
            &self.scope_id,
            &self.event_type,
            sequence,
        ));
        self
    }
}

/// Stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub session_id: SessionId,
    pub scope_id: ScopeId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub redacted: bool,
    pub idempotency_key: Option<String>,
    pub sequence: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Result of an append. A duplicate key returns the prior id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub id: i64,
    pub deduplicated: bool,
    pub redacted: bool,
}

/// Stored session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub definition_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata of the currently seeded definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMeta {
    pub definition_version: String,
    pub fingerprint: String,
    pub transitions_loaded: u32,
    pub rules_loaded: u32,
    pub seeded_at: DateTime<Utc>,
}
