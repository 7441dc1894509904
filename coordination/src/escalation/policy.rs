//! Escalation Policy — named special rules that override the plain table lookup.
//!
//! Each special rule is stored as `{rule_name, config}` where `config` is a JSON
//! object carrying a `kind` discriminator plus kind-specific parameters:
//!
//! ```yaml
//! - rule_name: dev-failure-escalation
//!   config:
//!     kind: failure_escalation
//!     description: Hand repeated failures to the architect
//!     threshold: 2
//!     escalation_role: architect
//!     failure_statuses: [fail, compile_error]
//! ```
//!
//! Rules of an unrecognized kind are kept in storage but ignored at evaluation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A special rule as stored in the `special_rules` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialRule {
    pub rule_name: String,
    pub config: serde_json::Value,
}

impl SpecialRule {
    pub fn new(rule_name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            rule_name: rule_name.into(),
            config,
        }
    }

    /// Human description carried in the config, if any.
    pub fn description(&self) -> Option<&str> {
        self.config.get("description").and_then(|v| v.as_str())
    }

    /// Raw `kind` discriminator.
    pub fn kind(&self) -> Option<&str> {
        self.config.get("kind").and_then(|v| v.as_str())
    }
}

/// Repeated failures of a scope escalate to a stronger role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEscalation {
    /// Prior consecutive failures needed before the next failure escalates.
    pub threshold: u32,
    pub escalation_role: String,
    pub failure_statuses: Vec<String>,
    /// Restrict to these reporting roles. Empty means any role.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl FailureEscalation {
    pub fn is_failure(&self, status: &str) -> bool {
        self.failure_statuses.iter().any(|s| s == status)
    }

    pub fn applies_to_role(&self, role: &str) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| r == role)
    }
}

/// Sensitive scopes are forced through a dedicated role and a mandatory review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityOverride {
    pub force_role: String,
    pub review_role: String,
}

/// Under a degraded mode, a role is skipped as though it had passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedBypass {
    pub mode: String,
    pub skip_role: String,
    pub pass_status: String,
}

/// Global ceiling on batch size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelCap {
    pub max_parallel: u32,
}

/// Role used when the table has no entry for a role or status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownTransitionFallback {
    pub fallback_role: String,
}

/// Role that receives control when a chained check finds nothing remaining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRule {
    pub all_complete_role: String,
}

/// Parsed form of a special rule's `config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyRuleKind {
    FailureEscalation(FailureEscalation),
    SensitivityOverride(SensitivityOverride),
    DegradedBypass(DegradedBypass),
    ParallelCap(ParallelCap),
    UnknownTransitionFallback(UnknownTransitionFallback),
    Completion(CompletionRule),
    #[serde(other)]
    Unrecognized,
}

/// Which mechanism changed a decision. Recorded on every applied override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    DegradedBypass,
    FailureEscalation,
    SensitivityOverride,
    ParallelCap,
    ChainAllComplete,
    ChainContinuation,
    UnknownTransitionFallback,
}

impl OverrideKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DegradedBypass => "degraded_bypass",
            Self::FailureEscalation => "failure_escalation",
            Self::SensitivityOverride => "sensitivity_override",
            Self::ParallelCap => "parallel_cap",
            Self::ChainAllComplete => "chain_all_complete",
            Self::ChainContinuation => "chain_continuation",
            Self::UnknownTransitionFallback => "unknown_transition_fallback",
        }
    }
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy rule paired with the name it was registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Named<T> {
    pub rule_name: String,
    pub rule: T,
}

/// Errors raised while interpreting special rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("special rule name must not be empty")]
    EmptyName,

    #[error("duplicate special rule '{0}'")]
    DuplicateName(String),

    #[error("special rule '{rule_name}' config must be a JSON object")]
    NotAnObject { rule_name: String },

    #[error("special rule '{rule_name}' is missing a 'kind'")]
    MissingKind { rule_name: String },

    #[error("special rule '{rule_name}' is malformed: {detail}")]
    Malformed { rule_name: String, detail: String },

    #[error("special rule '{rule_name}': {detail}")]
    Invalid { rule_name: String, detail: String },

    #[error("at most one '{kind}' rule is allowed, found '{first}' and '{second}'")]
    Conflicting {
        kind: &'static str,
        first: String,
        second: String,
    },

    #[error("no unknown_transition_fallback rule is defined")]
    MissingFallback,
}

/// Typed view over all special rules, grouped by kind.
///
/// Within a kind, rules are kept in `rule_name` order so evaluation is
/// deterministic regardless of how the rules were declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub bypasses: Vec<Named<DegradedBypass>>,
    pub escalations: Vec<Named<FailureEscalation>>,
    pub sensitivity: Option<Named<SensitivityOverride>>,
    pub parallel_cap: Option<Named<ParallelCap>>,
    pub fallback: Named<UnknownTransitionFallback>,
    pub completion: Option<Named<CompletionRule>>,
    /// Names of rules whose kind was not recognized.
    pub ignored: Vec<String>,
}

impl EscalationPolicy {
    /// Interpret stored special rules.
    pub fn from_rules(rules: &[SpecialRule]) -> Result<Self, PolicyError> {
        let mut sorted: Vec<&SpecialRule> = rules.iter().collect();
        sorted.sort_by(|a, b| a.rule_name.cmp(&b.rule_name));

        let mut bypasses = Vec::new();
        let mut escalations = Vec::new();
        let mut sensitivity: Option<Named<SensitivityOverride>> = None;
        let mut parallel_cap: Option<Named<ParallelCap>> = None;
        let mut fallback: Option<Named<UnknownTransitionFallback>> = None;
        let mut completion: Option<Named<CompletionRule>> = None;
        let mut ignored = Vec::new();

        let mut previous: Option<&str> = None;
        for rule in sorted {
            let name = rule.rule_name.as_str();
            if name.trim().is_empty() {
                return Err(PolicyError::EmptyName);
            }
            if previous == Some(name) {
                return Err(PolicyError::DuplicateName(name.to_string()));
            }
            previous = Some(name);

            match parse_kind(rule)? {
                PolicyRuleKind::FailureEscalation(r) => {
                    if r.threshold == 0 {
                        return Err(invalid(name, "threshold must be at least 1"));
                    }
                    if r.failure_statuses.is_empty() {
                        return Err(invalid(name, "failure_statuses must not be empty"));
                    }
                    require_non_empty(name, "escalation_role", &r.escalation_role)?;
                    escalations.push(named(name, r));
                }
                PolicyRuleKind::SensitivityOverride(r) => {
                    require_non_empty(name, "force_role", &r.force_role)?;
                    require_non_empty(name, "review_role", &r.review_role)?;
                    set_once(&mut sensitivity, "sensitivity_override", named(name, r))?;
                }
                PolicyRuleKind::DegradedBypass(r) => {
                    require_non_empty(name, "mode", &r.mode)?;
                    require_non_empty(name, "skip_role", &r.skip_role)?;
                    require_non_empty(name, "pass_status", &r.pass_status)?;
                    bypasses.push(named(name, r));
                }
                PolicyRuleKind::ParallelCap(r) => {
                    if r.max_parallel == 0 {
                        return Err(invalid(name, "max_parallel must be at least 1"));
                    }
                    set_once(&mut parallel_cap, "parallel_cap", named(name, r))?;
                }
                PolicyRuleKind::UnknownTransitionFallback(r) => {
                    require_non_empty(name, "fallback_role", &r.fallback_role)?;
                    set_once(&mut fallback, "unknown_transition_fallback", named(name, r))?;
                }
                PolicyRuleKind::Completion(r) => {
                    require_non_empty(name, "all_complete_role", &r.all_complete_role)?;
                    set_once(&mut completion, "completion", named(name, r))?;
                }
                PolicyRuleKind::Unrecognized => {
                    warn!(
                        rule_name = name,
                        kind = rule.kind().unwrap_or_default(),
                        "Ignoring special rule of unrecognized kind"
                    );
                    ignored.push(name.to_string());
                }
            }
        }

        Ok(Self {
            bypasses,
            escalations,
            sensitivity,
            parallel_cap,
            fallback: fallback.ok_or(PolicyError::MissingFallback)?,
            completion,
            ignored,
        })
    }

    /// Bypass rules active under `mode`.
    pub fn bypasses_for<'a>(&'a self, mode: &'a str) -> impl Iterator<Item = &'a Named<DegradedBypass>> {
        self.bypasses.iter().filter(move |b| b.rule.mode == mode)
    }

    /// Escalation rules that could fire for `(role, status)`.
    pub fn escalations_for<'a>(
        &'a self,
        role: &'a str,
        status: &'a str,
    ) -> impl Iterator<Item = &'a Named<FailureEscalation>> {
        self.escalations
            .iter()
            .filter(move |e| e.rule.applies_to_role(role) && e.rule.is_failure(status))
    }

    pub fn max_parallel(&self) -> Option<u32> {
        self.parallel_cap.as_ref().map(|c| c.rule.max_parallel)
    }
}

fn parse_kind(rule: &SpecialRule) -> Result<PolicyRuleKind, PolicyError> {
    if !rule.config.is_object() {
        return Err(PolicyError::NotAnObject {
            rule_name: rule.rule_name.clone(),
        });
    }
    if rule.kind().is_none() {
        return Err(PolicyError::MissingKind {
            rule_name: rule.rule_name.clone(),
        });
    }
    serde_json::from_value(rule.config.clone()).map_err(|e| PolicyError::Malformed {
        rule_name: rule.rule_name.clone(),
        detail: e.to_string(),
    })
}

fn named<T>(name: &str, rule: T) -> Named<T> {
    Named {
        rule_name: name.to_string(),
        rule,
    }
}

fn invalid(name: &str, detail: &str) -> PolicyError {
    PolicyError::Invalid {
        rule_name: name.to_string(),
        detail: detail.to_string(),
    }
}

fn require_non_empty(name: &str, field: &str, value: &str) -> Result<(), PolicyError> {
    if value.trim().is_empty() {
        return Err(invalid(name, &format!("{field} must not be empty")));
    }
    Ok(())
}

fn set_once<T>(
    slot: &mut Option<Named<T>>,
    kind: &'static str,
    value: Named<T>,
) -> Result<(), PolicyError> {
    if let Some(existing) = slot {
        return Err(PolicyError::Conflicting {
            kind,
            first: existing.rule_name.clone(),
            second: value.rule_name,
        });
    }
    *slot = Some(value);
    Ok(())
}
