//! Router inputs and outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::escalation::OverrideKind;
use crate::state::scope_or_global;
use crate::table::{Action, ThenAction};

/// Mode used when the caller does not name one.
pub const NORMAL_MODE: &str = "normal";

/// A role reporting a status for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub session_id: String,
    pub scope_id: String,
    pub current_role: String,
    pub status_code: String,
    pub mode: String,
    /// Per-scope report sequence. When set, the decision is recorded under a
    /// derived idempotency key and a repeated report returns the stored decision.
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl RouteRequest {
    pub fn new(
        session_id: impl Into<String>,
        scope_id: Option<&str>,
        current_role: impl Into<String>,
        status_code: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scope_id: scope_or_global(scope_id).to_string(),
            current_role: current_role.into(),
            status_code: status_code.into(),
            mode: NORMAL_MODE.to_string(),
            sequence: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// State of a chained `check-remaining` evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// No chained action was evaluated.
    #[default]
    None,
    /// Nothing pending: control passes to the all-complete role.
    AllComplete,
    /// Work remains: a continuation batch was issued.
    Continuation,
    /// Nothing pending, but items are still in progress. No batch is
    /// issued and completion waits for a later report.
    AwaitingInProgress,
}

/// Why the table had no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKind {
    /// No rule starts from this role at all.
    UnknownRole,
    /// The role is known but not with this status.
    UnknownStatus,
}

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownKind::UnknownRole => write!(f, "unknown role"),
            UnknownKind::UnknownStatus => write!(f, "unknown status"),
        }
    }
}

/// One override that changed the decision, named after its rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOverride {
    pub rule_name: String,
    pub kind: OverrideKind,
    pub detail: String,
}

impl AppliedOverride {
    pub fn new(rule_name: impl Into<String>, kind: OverrideKind, detail: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Fully resolved routing decision. Persisted verbatim as the payload of
/// `routing_decision` / `unknown_transition` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDecision {
    pub session_id: String,
    pub scope_id: String,
    pub current_role: String,
    pub status_code: String,
    pub mode: String,
    pub next_role: Option<String>,
    pub action: Action,
    #[serde(default)]
    pub then_action: Option<ThenAction>,
    #[serde(default)]
    pub applied_overrides: Vec<AppliedOverride>,
    #[serde(default)]
    pub required_context: BTreeSet<String>,
    #[serde(default)]
    pub model_or_priority_override: Option<String>,
    /// Work item ids to launch, in queue order.
    #[serde(default)]
    pub batch: Vec<String>,
    #[serde(default)]
    pub chain: ChainState,
    /// Role that must review downstream of a sensitivity override.
    #[serde(default)]
    pub mandatory_review: Option<String>,
    /// Set when this decision came from the unknown-transition fallback.
    #[serde(default)]
    pub fallback: Option<UnknownKind>,
    pub terminal: bool,
    pub completes_pipeline: bool,
    pub definition_version: String,
}

impl RouterDecision {
    /// Whether an override of `kind` contributed to this decision.
    pub fn override_fired(&self, kind: OverrideKind) -> bool {
        self.applied_overrides.iter().any(|o| o.kind == kind)
    }

    pub fn escalated(&self) -> bool {
        self.override_fired(OverrideKind::FailureEscalation)
    }

    /// Recompute the derived flags after the decision has been mutated.
    pub(crate) fn finalize(&mut self) {
        self.terminal = self.next_role.is_none();
        self.completes_pipeline = self.action.completes_pipeline();
    }
}

/// The table had no entry for the reported `(role, status)`.
///
/// Carries a fully formed fallback decision so callers always have a next
/// step, and the decision is recorded like any other.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no transition for ({role}, {status}): {kind}; falling back to '{fallback_role}'")]
pub struct UnknownTransitionError {
    pub kind: UnknownKind,
    pub role: String,
    pub status: String,
    pub fallback_role: String,
    pub decision: Box<RouterDecision>,
}

impl UnknownTransitionError {
    pub(crate) fn from_decision(decision: RouterDecision) -> Option<Self> {
        let kind = decision.fallback?;
        let fallback_role = decision.next_role.clone()?;
        Some(Self {
            kind,
            role: decision.current_role.clone(),
            status: decision.status_code.clone(),
            fallback_role,
            decision: Box::new(decision),
        })
    }
}

/// Outcome of evaluating a route request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Routed(RouterDecision),
    UnknownTransition(UnknownTransitionError),
}

impl RouteOutcome {
    /// Classify a decision by its fallback marker.
    pub fn from_decision(decision: RouterDecision) -> Self {
        if decision.fallback.is_some() {
            if let Some(err) = UnknownTransitionError::from_decision(decision.clone()) {
                return RouteOutcome::UnknownTransition(err);
            }
        }
        RouteOutcome::Routed(decision)
    }

    pub fn decision(&self) -> &RouterDecision {
        match self {
            RouteOutcome::Routed(d) => d,
            RouteOutcome::UnknownTransition(e) => &e.decision,
        }
    }

    pub fn into_decision(self) -> RouterDecision {
        match self {
            RouteOutcome::Routed(d) => d,
            RouteOutcome::UnknownTransition(e) => *e.decision,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, RouteOutcome::UnknownTransition(_))
    }

    /// Treat an unknown transition as an error.
    pub fn into_result(self) -> Result<RouterDecision, UnknownTransitionError> {
        match self {
            RouteOutcome::Routed(d) => Ok(d),
            RouteOutcome::UnknownTransition(e) => Err(e),
        }
    }
}
