//! Transition Table — declarative `(role, status) → routing rule` mapping.
//!
//! Pure data. The table is seeded once per session by the config loader,
//! held immutable for the rest of the session, and replaced wholesale on
//! reseed. Lookups are by exact `(current_role, status_code)` pair.
//!
//! ```text
//! (developer, done)      → reviewer        spawn
//! (reviewer, approved)   → merger          merge-then-check  ─┐
//! (merger, merged)       → developer       batch-spawn        │ then: check-remaining
//! (verifier, pass)       → ∅               end                │
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What the next role is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Launch the next role for this scope.
    Spawn,
    /// Relaunch the same kind of role with the previous context.
    Respawn,
    /// Launch one worker per pending work item, capped.
    BatchSpawn,
    /// Merge finished work, then evaluate the chained action.
    MergeThenCheck,
    /// Hand to a validator; the pipeline ends once it reports.
    ValidateThenEnd,
    /// Stop and wait for human input.
    PauseForInput,
    /// Pipeline complete.
    End,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Spawn,
        Action::Respawn,
        Action::BatchSpawn,
        Action::MergeThenCheck,
        Action::ValidateThenEnd,
        Action::PauseForInput,
        Action::End,
    ];

    /// Actions that never name a next role.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::PauseForInput)
    }

    /// Actions that qualify as the final step of a pipeline.
    pub fn completes_pipeline(self) -> bool {
        matches!(self, Self::End | Self::ValidateThenEnd)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Respawn => "respawn",
            Self::BatchSpawn => "batch-spawn",
            Self::MergeThenCheck => "merge-then-check",
            Self::ValidateThenEnd => "validate-then-end",
            Self::PauseForInput => "pause-for-input",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| TableError::UnknownAction(s.to_string()))
    }
}

/// Chained action evaluated after the base rule resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThenAction {
    /// Re-query pending work: none left → all-complete role, otherwise a
    /// continuation batch.
    CheckRemaining,
}

impl ThenAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckRemaining => "check-remaining",
        }
    }
}

impl fmt::Display for ThenAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThenAction {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check-remaining" => Ok(Self::CheckRemaining),
            other => Err(TableError::UnknownAction(other.to_string())),
        }
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub current_role: String,
    pub status_code: String,
    /// `None` means terminal.
    #[serde(default)]
    pub next_role: Option<String>,
    pub action: Action,
    #[serde(default)]
    pub required_context_keys: BTreeSet<String>,
    #[serde(default)]
    pub model_or_priority_override: Option<String>,
    /// Role suggested when this role reports a status the table does not know.
    #[serde(default)]
    pub fallback_role: Option<String>,
    #[serde(default)]
    pub batch_cap: Option<u32>,
    #[serde(default)]
    pub then_action: Option<ThenAction>,
}

impl TransitionRule {
    /// Create a rule with no optional attributes.
    pub fn new(
        current_role: impl Into<String>,
        status_code: impl Into<String>,
        next_role: Option<&str>,
        action: Action,
    ) -> Self {
        Self {
            current_role: current_role.into(),
            status_code: status_code.into(),
            next_role: next_role.map(String::from),
            action,
            required_context_keys: BTreeSet::new(),
            model_or_priority_override: None,
            fallback_role: None,
            batch_cap: None,
            then_action: None,
        }
    }

    pub fn with_context_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_context_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_batch_cap(mut self, cap: u32) -> Self {
        self.batch_cap = Some(cap);
        self
    }

    pub fn with_then(mut self, then_action: ThenAction) -> Self {
        self.then_action = Some(then_action);
        self
    }

    pub fn with_fallback(mut self, role: &str) -> Self {
        self.fallback_role = Some(role.to_string());
        self
    }

    pub fn with_override(mut self, value: &str) -> Self {
        self.model_or_priority_override = Some(value.to_string());
        self
    }

    /// Identity of this rule.
    pub fn key(&self) -> (String, String) {
        (self.current_role.clone(), self.status_code.clone())
    }

    /// Structural checks that need no other rule.
    pub fn validate(&self) -> Result<(), TableError> {
        if self.current_role.trim().is_empty() {
            return Err(TableError::EmptyField {
                field: "current_role",
            });
        }
        if self.status_code.trim().is_empty() {
            return Err(TableError::EmptyField {
                field: "status_code",
            });
        }
        match (&self.next_role, self.action.is_terminal()) {
            (Some(role), true) => {
                return Err(TableError::UnexpectedNextRole {
                    role: self.current_role.clone(),
                    status: self.status_code.clone(),
                    action: self.action,
                    next_role: role.clone(),
                })
            }
            (None, false) => {
                return Err(TableError::MissingNextRole {
                    role: self.current_role.clone(),
                    status: self.status_code.clone(),
                    action: self.action,
                })
            }
            (Some(role), false) if role.trim().is_empty() => {
                return Err(TableError::EmptyField { field: "next_role" })
            }
            _ => {}
        }
        if self.batch_cap == Some(0) {
            return Err(TableError::ZeroBatchCap {
                role: self.current_role.clone(),
                status: self.status_code.clone(),
            });
        }
        if self.then_action.is_some() && self.action.is_terminal() {
            return Err(TableError::ChainOnTerminal {
                role: self.current_role.clone(),
                status: self.status_code.clone(),
            });
        }
        Ok(())
    }
}

/// Errors raised while building a transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("duplicate transition for ({role}, {status})")]
    Duplicate { role: String, status: String },

    #[error("transition field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    #[error("({role}, {status}): action '{action}' requires a next role")]
    MissingNextRole {
        role: String,
        status: String,
        action: Action,
    },

    #[error("({role}, {status}): terminal action '{action}' cannot route to '{next_role}'")]
    UnexpectedNextRole {
        role: String,
        status: String,
        action: Action,
        next_role: String,
    },

    #[error("({role}, {status}): batch_cap must be at least 1")]
    ZeroBatchCap { role: String, status: String },

    #[error("({role}, {status}): a terminal action cannot carry a chained action")]
    ChainOnTerminal { role: String, status: String },

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

/// Immutable lookup structure over a validated rule set.
///
/// Backed by a `BTreeMap` so iteration order (and therefore anything
/// derived from it, like fingerprints) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTable {
    rules: BTreeMap<(String, String), TransitionRule>,
}

impl TransitionTable {
    /// Build a table, rejecting invalid rules and duplicate identities.
    pub fn from_rules(rules: impl IntoIterator<Item = TransitionRule>) -> Result<Self, TableError> {
        let mut map = BTreeMap::new();
        for rule in rules {
            rule.validate()?;
            let key = rule.key();
            if map.contains_key(&key) {
                return Err(TableError::Duplicate {
                    role: key.0,
                    status: key.1,
                });
            }
            map.insert(key, rule);
        }
        Ok(Self { rules: map })
    }

    pub fn get(&self, role: &str, status: &str) -> Option<&TransitionRule> {
        self.rules.get(&(role.to_string(), status.to_string()))
    }

    /// Whether any rule starts from `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.rules_for_role(role).next().is_some()
    }

    pub fn rules_for_role<'a, 'r>(&'a self, role: &'r str) -> impl Iterator<Item = &'a TransitionRule> + 'r
    where
        'a: 'r,
    {
        self.rules
            .values()
            .filter(move |rule| rule.current_role == role)
    }

    /// First declared per-rule fallback for `role`, in status order.
    pub fn fallback_for_role(&self, role: &str) -> Option<&str> {
        self.rules
            .values()
            .filter(|rule| rule.current_role == role)
            .find_map(|rule| rule.fallback_role.as_deref())
    }

    /// Rules in `(role, status)` order.
    pub fn iter(&self) -> impl Iterator<Item = &TransitionRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TransitionRule> {
        vec![
            TransitionRule::new("developer", "done", Some("reviewer"), Action::Spawn)
                .with_context_keys(["diff", "task"]),
            TransitionRule::new("developer", "fail", Some("developer"), Action::Respawn)
                .with_fallback("architect"),
            TransitionRule::new("reviewer", "approved", None, Action::End),
        ]
    }

    #[test]
    fn test_lookup_by_role_and_status() {
        let table = TransitionTable::from_rules(sample()).unwrap();
        let rule = table.get("developer", "done").unwrap();
        assert_eq!(rule.next_role.as_deref(), Some("reviewer"));
        assert_eq!(rule.action, Action::Spawn);
        assert!(rule.required_context_keys.contains("diff"));
        assert!(table.get("developer", "unknown").is_none());
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut rules = sample();
        rules.push(TransitionRule::new(
            "developer",
            "done",
            Some("architect"),
            Action::Spawn,
        ));
        let err = TransitionTable::from_rules(rules).unwrap_err();
        assert_eq!(
            err,
            TableError::Duplicate {
                role: "developer".into(),
                status: "done".into()
            }
        );
    }

    #[test]
    fn test_terminal_and_next_role_consistency() {
        let end_with_role = TransitionRule::new("a", "b", Some("c"), Action::End);
        assert!(matches!(
            end_with_role.validate(),
            Err(TableError::UnexpectedNextRole { .. })
        ));

        let spawn_without_role = TransitionRule::new("a", "b", None, Action::Spawn);
        assert!(matches!(
            spawn_without_role.validate(),
            Err(TableError::MissingNextRole { .. })
        ));

        let validate_then_end = TransitionRule::new("a", "b", Some("qa"), Action::ValidateThenEnd);
        assert!(validate_then_end.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_cap_rejected() {
        let rule =
            TransitionRule::new("planner", "ready", Some("dev"), Action::BatchSpawn).with_batch_cap(0);
        assert!(matches!(rule.validate(), Err(TableError::ZeroBatchCap { .. })));
    }

    #[test]
    fn test_role_queries() {
        let table = TransitionTable::from_rules(sample()).unwrap();
        assert!(table.has_role("developer"));
        assert!(!table.has_role("ghost"));
        assert_eq!(table.fallback_for_role("developer"), Some("architect"));
        assert_eq!(table.fallback_for_role("reviewer"), None);
        assert_eq!(table.rules_for_role("developer").count(), 2);
    }

    #[test]
    fn test_fallback_outlives_role_argument() {
        let table = TransitionTable::from_rules(sample()).unwrap();
        let fallback = {
            let role = String::from("developer");
            table.fallback_for_role(&role)
        };
        assert_eq!(fallback, Some("architect"));

        let statuses: Vec<&str> = {
            let role = String::from("developer");
            table.rules_for_role(&role).map(|r| r.status_code.as_str()).collect()
        };
        assert_eq!(statuses.len(), 2);
    }

    #[test]
    fn test_action_serde_uses_kebab_case() {
        let json = serde_json::to_string(&Action::MergeThenCheck).unwrap();
        assert_eq!(json, "\"merge-then-check\"");
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("teleport".parse::<Action>().is_err());
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let yaml = r#"
current_role: merger
status_code: merged
next_role: developer
action: batch-spawn
batch_cap: 3
then_action: check-remaining
"#;
        let rule: TransitionRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.batch_cap, Some(3));
        assert_eq!(rule.then_action, Some(ThenAction::CheckRemaining));
        assert!(rule.required_context_keys.is_empty());
        assert!(rule.validate().is_ok());
    }
}
