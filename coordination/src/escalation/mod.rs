//! Escalation Module — deterministic overrides applied on top of table routing
//!
//! The transition table answers "what normally happens next". The escalation
//! policy answers "what happens instead" under four conditions:
//!
//! ```text
//! Condition                          | Effect
//! -----------------------------------|------------------------------------------
//! Degraded mode                      | Skip a role, follow its pass transition
//! Repeated failure (streak ≥ N)      | Route to the escalation role
//! Sensitive scope                    | Force a role + mandatory review
//! Batch larger than parallel cap     | Clamp the batch
//! ```
//!
//! Plus two structural rules: the unknown-transition fallback role and the
//! all-complete role used by chained checks.

pub mod policy;

pub use policy::{
    CompletionRule, DegradedBypass, EscalationPolicy, FailureEscalation, Named, OverrideKind,
    ParallelCap, PolicyError, PolicyRuleKind, SensitivityOverride, SpecialRule,
    UnknownTransitionFallback,
};
