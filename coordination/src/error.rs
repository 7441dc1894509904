//! Coordination error types
//!
//! Every failure the coordinator surfaces falls into one of five classes:
//!
//! | Class                | Retry? | Meaning                                          |
//! |----------------------|--------|--------------------------------------------------|
//! | Configuration        | no     | definition missing or invalid; session must stop |
//! | Unknown transition   | no     | no rule for (role, status); fallback attached    |
//! | Store contention     | yes    | lock contention or deadline; back off and retry  |
//! | Store integrity      | no     | caller misuse rejected by a constraint           |
//! | Redaction failure    | no     | payload could not be scanned; write refused      |
//!
//! [`StructuredError`] renders any of them for machine consumers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::loader::ConfigError;
use crate::router::UnknownTransitionError;
use crate::state::{RedactionError, StoreError};

/// Result type alias for coordinator operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Machine-readable error view.
///
/// ```json
/// {
///   "code": "STORE_CONTENTION",
///   "message": "Store contention on append_event: gave up after 6 attempts",
///   "recovery_action": "Back off and retry the same call; idempotency keys make it safe",
///   "context": { "session_id": "s1" },
///   "retryable": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code, e.g. "CONFIGURATION_ERROR"
    pub code: String,

    pub message: String,

    /// What the caller should do next
    pub recovery_action: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub retryable: bool,
}

impl StructuredError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable: false,
        }
    }

    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors surfaced by the coordinator.
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Unknown transition: {0}")]
    UnknownTransition(#[from] UnknownTransitionError),

    /// Lock contention or deadline exceeded. Retryable.
    #[error("Store contention: {0}")]
    StoreContention(StoreError),

    /// Constraint violation caused by the caller. Not retried.
    #[error("Store integrity violation: {0}")]
    StoreIntegrity(StoreError),

    #[error("Redaction failure: {0}")]
    Redaction(RedactionError),

    /// Any other store failure (I/O, migration, corrupt rows).
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CoordinationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Redaction(e) => Self::Redaction(e),
            e if e.is_contention() => Self::StoreContention(e),
            e if e.is_integrity() => Self::StoreIntegrity(e),
            e => Self::Store(e),
        }
    }
}

impl CoordinationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnknownTransition(_) => "UNKNOWN_TRANSITION",
            Self::StoreContention(_) => "STORE_CONTENTION",
            Self::StoreIntegrity(_) => "STORE_INTEGRITY",
            Self::Redaction(_) => "REDACTION_FAILURE",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreContention(_))
    }

    /// Whether the session should stop rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::StoreIntegrity(_) | Self::Store(_)
        )
    }

    pub fn to_structured(&self) -> StructuredError {
        let recovery = match self {
            Self::Configuration(ConfigError::NotSeeded) => {
                "Call seed with a definition version before routing".to_string()
            }
            Self::Configuration(ConfigError::DefinitionNotFound { version, dir }) => format!(
                "Add {}/{}.yaml (or .toml/.json) or seed an existing version",
                dir.display(),
                version
            ),
            Self::Configuration(_) => {
                "Fix the definition document and seed again; the session cannot start".to_string()
            }
            Self::UnknownTransition(e) => format!(
                "Add a transition for ({}, {}) or continue with fallback role '{}'",
                e.role, e.status, e.fallback_role
            ),
            Self::StoreContention(_) => {
                "Back off and retry the same call; idempotency keys make it safe".to_string()
            }
            Self::StoreIntegrity(_) => {
                "Do not retry; correct the request (ordering, scope or completion state)".to_string()
            }
            Self::Redaction(_) => {
                "Reduce payload size or nesting; the event was not stored".to_string()
            }
            Self::Store(_) => "Check the database file and run migrate".to_string(),
        };

        let mut structured = StructuredError::new(self.code(), self.to_string(), recovery);
        if let Self::UnknownTransition(e) = self {
            structured = structured
                .with_context("role", e.role.clone())
                .with_context("status", e.status.clone())
                .with_context("kind", e.kind.to_string())
                .with_context("fallback_role", e.fallback_role.clone());
        }
        if self.is_retryable() {
            structured = structured.retryable();
        }
        structured
    }

    pub fn to_structured_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_structured())
            .unwrap_or_else(|_| format!(r#"{{"code":"{}","message":"{}"}}"#, self.code(), self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let err: CoordinationError = StoreError::Contention {
            operation: "append_event",
            attempts: 6,
        }
        .into();
        assert_eq!(err.code(), "STORE_CONTENTION");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());

        let err: CoordinationError = StoreError::Integrity("out of order".into()).into();
        assert_eq!(err.code(), "STORE_INTEGRITY");
        assert!(!err.is_retryable());
        assert!(err.is_fatal());

        let err: CoordinationError = StoreError::Redaction(RedactionError::TooDeep { max_depth: 4 }).into();
        assert_eq!(err.code(), "REDACTION_FAILURE");

        let err: CoordinationError = StoreError::LockPoisoned.into();
        assert_eq!(err.code(), "STORE_ERROR");
    }

    #[test]
    fn test_structured_error() {
        let err = CoordinationError::Configuration(ConfigError::NotSeeded);
        let structured = err.to_structured();
        assert_eq!(structured.code, "CONFIGURATION_ERROR");
        assert!(!structured.retryable);
        assert!(structured.recovery_action.contains("seed"));

        let err: CoordinationError = StoreError::Timeout {
            operation: "upsert_state",
            waited_ms: 50,
        }
        .into();
        let json: serde_json::Value = serde_json::from_str(&err.to_structured_json()).unwrap();
        assert_eq!(json["code"], "STORE_CONTENTION");
        assert_eq!(json["retryable"], true);
    }
}
