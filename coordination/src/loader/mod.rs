//! Config Loader — turns a versioned definition document into a routing table.
//!
//! Definitions live in a [`DefinitionCatalog`] directory, one file per
//! version, or arrive as a separate transition table and special rules
//! document. [`compile`] validates a definition as a whole; the coordinator
//! stores the compiled result with a full replace on every seed.

pub mod catalog;
pub mod definition;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::{EscalationPolicy, PolicyError, SpecialRule};
use crate::router::RoutingTable;
use crate::state::ConfigMeta;
use crate::table::{Action, TableError, ThenAction, TransitionRule, TransitionTable};

pub use catalog::{validate_version, DefinitionCatalog};
pub use definition::{
    read_document, DefinitionFormat, PipelineDefinition, SpecialRulesDoc, TransitionTableDoc,
};

/// Errors raised while loading or validating a definition. All are fatal for
/// the session that triggered them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no definition has been seeded")]
    NotSeeded,

    #[error("definition '{version}' not found in {}", dir.display())]
    DefinitionNotFound { version: String, dir: PathBuf },

    #[error("invalid definition version '{0}'")]
    InvalidVersion(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{format} parse error in {source_name}: {detail}")]
    Parse {
        source_name: String,
        format: DefinitionFormat,
        detail: String,
    },

    #[error("unsupported definition format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("definition version mismatch: expected '{expected}', found '{found}'")]
    VersionMismatch { expected: String, found: String },

    #[error("invalid transition table: {0}")]
    InvalidTable(#[from] TableError),

    #[error("invalid special rules: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error("({role}, {status}): batch-spawn needs a batch_cap or a parallel_cap rule")]
    UncappedBatch { role: String, status: String },

    #[error("({role}, {status}): check-remaining needs a completion rule")]
    MissingCompletionRule { role: String, status: String },

    #[error("bypass '{rule_name}' skips '{skip_role}' but ({skip_role}, {pass_status}) has no transition")]
    MissingPassTransition {
        rule_name: String,
        skip_role: String,
        pass_status: String,
    },
}

/// Result of a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub transitions_loaded: u32,
    pub rules_loaded: u32,
    pub definition_version: String,
    pub fingerprint: String,
}

impl From<&ConfigMeta> for SeedReport {
    fn from(meta: &ConfigMeta) -> Self {
        Self {
            transitions_loaded: meta.transitions_loaded,
            rules_loaded: meta.rules_loaded,
            definition_version: meta.definition_version.clone(),
            fingerprint: meta.fingerprint.clone(),
        }
    }
}

/// Validate a definition and build its routing table.
pub fn compile(definition: &PipelineDefinition) -> Result<RoutingTable, ConfigError> {
    validate_version(&definition.version)?;
    let fingerprint = definition.fingerprint()?;
    build(
        definition.version.clone(),
        fingerprint,
        definition.transitions.clone(),
        &definition.special_rules,
    )
}

/// Rebuild the routing table from stored rows.
///
/// Stored rows passed [`compile`] when they were seeded, so a failure here
/// means the tables were edited behind the loader's back.
pub fn from_stored(
    meta: &ConfigMeta,
    transitions: Vec<TransitionRule>,
    rules: &[SpecialRule],
) -> Result<RoutingTable, ConfigError> {
    build(
        meta.definition_version.clone(),
        meta.fingerprint.clone(),
        transitions,
        rules,
    )
}

fn build(
    definition_version: String,
    fingerprint: String,
    transitions: Vec<TransitionRule>,
    rules: &[SpecialRule],
) -> Result<RoutingTable, ConfigError> {
    let transitions = TransitionTable::from_rules(transitions)?;
    let policy = EscalationPolicy::from_rules(rules)?;
    cross_check(&transitions, &policy)?;
    Ok(RoutingTable {
        definition_version,
        fingerprint,
        transitions,
        policy,
    })
}

/// Checks that span the transition table and the policy.
fn cross_check(transitions: &TransitionTable, policy: &EscalationPolicy) -> Result<(), ConfigError> {
    for rule in transitions.iter() {
        let batches = rule.action == Action::BatchSpawn || rule.then_action.is_some();
        if batches && rule.batch_cap.is_none() && policy.parallel_cap.is_none() {
            return Err(ConfigError::UncappedBatch {
                role: rule.current_role.clone(),
                status: rule.status_code.clone(),
            });
        }
        if rule.then_action == Some(ThenAction::CheckRemaining) && policy.completion.is_none() {
            return Err(ConfigError::MissingCompletionRule {
                role: rule.current_role.clone(),
                status: rule.status_code.clone(),
            });
        }
    }

    for bypass in &policy.bypasses {
        if transitions
            .get(&bypass.rule.skip_role, &bypass.rule.pass_status)
            .is_none()
        {
            return Err(ConfigError::MissingPassTransition {
                rule_name: bypass.rule_name.clone(),
                skip_role: bypass.rule.skip_role.clone(),
                pass_status: bypass.rule.pass_status.clone(),
            });
        }
    }
    Ok(())
}
