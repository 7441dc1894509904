//! Pipeline coordinator — the facade external callers talk to.
//!
//! Composes the definition loader, the router and the state store into the
//! three call shapes a pipeline driver needs: `seed` once per session start,
//! `route` after every unit of work, and `record` / `upsert_state` /
//! `atomic` to persist progress.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::error::CoordinationResult;
use crate::events::types::{
    DECISION_EVENT_TYPES, DEFINITION_SEEDED, ROUTING_DECISION, SENSITIVITY_FLAGGED,
    UNKNOWN_TRANSITION,
};
use crate::events::EventHistory;
use crate::loader::{self, ConfigError, DefinitionCatalog, PipelineDefinition, SeedReport};
use crate::router::{
    RouteOutcome, RouteRequest, Router, RouterDecision, RoutingTable, StoreContext,
};
use crate::state::{
    idempotency_key, AppendOutcome, ConfigMeta, NewEvent, SharedStateStore, StateStore,
    StateType, StateUpdate, StoreError, SCOPE_FLAGS, WORK_ITEM_SCOPE,
};

/// Result of a `route` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub outcome: RouteOutcome,
    /// Event the decision was recorded under.
    pub event_id: i64,
    /// The request repeated an already recorded sequence; `outcome` is the
    /// stored decision, not a fresh evaluation.
    pub deduplicated: bool,
}

impl RouteReport {
    pub fn decision(&self) -> &RouterDecision {
        self.outcome.decision()
    }
}

/// Serializable summary of a route call for callers that speak JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub event_id: i64,
    pub deduplicated: bool,
    pub unknown_transition: bool,
    pub decision: RouterDecision,
}

impl From<&RouteReport> for RouteSummary {
    fn from(report: &RouteReport) -> Self {
        Self {
            event_id: report.event_id,
            deduplicated: report.deduplicated,
            unknown_transition: report.outcome.is_unknown(),
            decision: report.decision().clone(),
        }
    }
}

/// Coordinator over one store and one definition catalog.
pub struct PipelineCoordinator {
    store: SharedStateStore,
    catalog: DefinitionCatalog,
    /// Last routing table built, keyed by its fingerprint.
    routing: RwLock<Option<Arc<RoutingTable>>>,
}

impl PipelineCoordinator {
    pub fn new(store: SharedStateStore, catalog: DefinitionCatalog) -> Self {
        Self {
            store,
            catalog,
            routing: RwLock::new(None),
        }
    }

    /// Open the store named by `config` and use its definitions directory.
    pub fn open(config: &CoordinationConfig) -> CoordinationResult<Self> {
        let store = StateStore::open_with(&config.db_path, &config.store_config())?.shared();
        Ok(Self::new(
            store,
            DefinitionCatalog::new(&config.definitions_dir),
        ))
    }

    pub fn store(&self) -> &SharedStateStore {
        &self.store
    }

    pub fn catalog(&self) -> &DefinitionCatalog {
        &self.catalog
    }

    pub fn history(&self) -> EventHistory {
        EventHistory::new(Arc::clone(&self.store))
    }

    /// Fresh random session id.
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Seed the catalog definition `version`. Re-seeding re-syncs the stored
    /// tables to the file, replacing whatever was there.
    pub fn seed(&self, version: &str) -> CoordinationResult<SeedReport> {
        let definition = self.catalog.load(version)?;
        self.seed_definition(&definition)
    }

    /// Seed from a separate transition table and special rules document.
    pub fn seed_from(&self, table_path: &Path, rules_path: &Path) -> CoordinationResult<SeedReport> {
        let definition = PipelineDefinition::from_part_files(table_path, rules_path)?;
        self.seed_definition(&definition)
    }

    /// Validate and store `definition` with a full replace.
    pub fn seed_definition(&self, definition: &PipelineDefinition) -> CoordinationResult<SeedReport> {
        let table = Arc::new(loader::compile(definition)?);

        let meta = ConfigMeta {
            definition_version: table.definition_version.clone(),
            fingerprint: table.fingerprint.clone(),
            transitions_loaded: count(definition.transitions.len()),
            rules_loaded: count(definition.special_rules.len()),
            seeded_at: chrono::Utc::now(),
        };
        self.store
            .replace_definition(&meta, &definition.transitions, &definition.special_rules)?;
        self.cache(Arc::clone(&table));

        if !table.policy.ignored.is_empty() {
            warn!(
                definition_version = %meta.definition_version,
                ignored = ?table.policy.ignored,
                "Definition carries special rules of unrecognized kind"
            );
        }
        info!(
            definition_version = %meta.definition_version,
            fingerprint = %meta.fingerprint,
            transitions_loaded = meta.transitions_loaded,
            rules_loaded = meta.rules_loaded,
            "Pipeline definition seeded"
        );
        Ok(SeedReport::from(&meta))
    }

    /// Seed `version` for a session start and record it in the session's log.
    pub fn start_session(&self, session_id: &str, version: &str) -> CoordinationResult<SeedReport> {
        let report = self.seed(version)?;
        self.store
            .ensure_session(session_id, Some(&report.definition_version))?;
        let payload = serde_json::to_value(&report).map_err(StoreError::from)?;
        self.store
            .append_event(&NewEvent::new(session_id, None, DEFINITION_SEEDED, payload), None)?;
        Ok(report)
    }

    /// Metadata of the current seed, if any.
    pub fn seeded(&self) -> CoordinationResult<Option<SeedReport>> {
        Ok(self.store.config_meta()?.as_ref().map(SeedReport::from))
    }

    /// The routing table for the stored definition.
    ///
    /// Rebuilt from the store whenever the stored fingerprint differs from
    /// the cached one, so a re-seed by another process is picked up.
    pub fn routing_table(&self) -> CoordinationResult<Arc<RoutingTable>> {
        let meta = self
            .store
            .config_meta()?
            .ok_or(ConfigError::NotSeeded)?;

        if let Some(cached) = self.cached() {
            if cached.fingerprint == meta.fingerprint
                && cached.definition_version == meta.definition_version
            {
                return Ok(cached);
            }
        }

        let transitions = self.store.load_transitions()?;
        let rules = self.store.load_special_rules()?;
        let table = Arc::new(loader::from_stored(&meta, transitions, &rules)?);
        debug!(
            definition_version = %table.definition_version,
            fingerprint = %table.fingerprint,
            "Routing table rebuilt from store"
        );
        self.cache(Arc::clone(&table));
        Ok(table)
    }

    fn cached(&self) -> Option<Arc<RoutingTable>> {
        self.routing.read().ok().and_then(|guard| guard.clone())
    }

    fn cache(&self, table: Arc<RoutingTable>) {
        if let Ok(mut guard) = self.routing.write() {
            *guard = Some(table);
        }
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Evaluate and record a routing decision.
    pub fn route(&self, request: &RouteRequest) -> CoordinationResult<RouteReport> {
        self.route_with_deadline(request, None)
    }

    /// [`route`](Self::route) with a caller-supplied store deadline.
    ///
    /// Evaluation and recording happen under the scope's write lock, so
    /// decisions for one scope are recorded in the order they were made and
    /// each sees the failure history its predecessors left.
    pub fn route_with_deadline(
        &self,
        request: &RouteRequest,
        deadline: Option<Instant>,
    ) -> CoordinationResult<RouteReport> {
        let router = Router::new(self.routing_table()?);
        let deadline = self.store.deadline(deadline);

        self.store
            .with_scope_lock(&request.session_id, &request.scope_id, Some(deadline), || {
                if let Some(report) = self.recorded_decision(request, deadline)? {
                    return Ok(report);
                }

                let ctx = StoreContext::new(self.store.as_ref(), deadline);
                let outcome = router.evaluate(&ctx, request)?;
                let event_type = if outcome.is_unknown() {
                    UNKNOWN_TRANSITION
                } else {
                    ROUTING_DECISION
                };
                let payload = serde_json::to_value(outcome.decision()).map_err(StoreError::from)?;
                let mut event = NewEvent::new(
                    &request.session_id,
                    Some(&request.scope_id),
                    event_type,
                    payload,
                );
                if let Some(sequence) = request.sequence {
                    event = event.sequenced(sequence);
                }
                let appended = self.store.append_decision_locked(&event, Some(deadline))?;

                let decision = outcome.decision();
                info!(
                    session_id = %request.session_id,
                    scope_id = %request.scope_id,
                    current_role = %request.current_role,
                    status = %request.status_code,
                    next_role = decision.next_role.as_deref().unwrap_or("-"),
                    action = %decision.action,
                    overrides = ?decision
                        .applied_overrides
                        .iter()
                        .map(|o| o.rule_name.as_str())
                        .collect::<Vec<_>>(),
                    event_id = appended.id,
                    "Routed"
                );
                Ok(RouteReport {
                    outcome,
                    event_id: appended.id,
                    deduplicated: appended.deduplicated,
                })
            })
    }

    /// Decision already recorded for a repeated sequenced request.
    fn recorded_decision(
        &self,
        request: &RouteRequest,
        deadline: Instant,
    ) -> CoordinationResult<Option<RouteReport>> {
        let Some(sequence) = request.sequence else {
            return Ok(None);
        };
        for event_type in DECISION_EVENT_TYPES {
            let key = idempotency_key(&request.session_id, &request.scope_id, event_type, sequence);
            let Some(record) = self.store.find_event_by_key_until(
                &request.session_id,
                &request.scope_id,
                event_type,
                &key,
                deadline,
            )?
            else {
                continue;
            };
            let decision: RouterDecision =
                serde_json::from_value(record.payload).map_err(StoreError::from)?;
            debug!(
                session_id = %request.session_id,
                scope_id = %request.scope_id,
                sequence,
                event_id = record.id,
                "Replaying recorded decision"
            );
            return Ok(Some(RouteReport {
                outcome: RouteOutcome::from_decision(decision),
                event_id: record.id,
                deduplicated: true,
            }));
        }
        Ok(None)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Append an event. A repeated idempotency key returns the prior id.
    pub fn record(&self, event: &NewEvent, deadline: Option<Instant>) -> CoordinationResult<AppendOutcome> {
        Ok(self.store.append_event(event, deadline)?)
    }

    pub fn upsert_state(&self, update: &StateUpdate, deadline: Option<Instant>) -> CoordinationResult<()> {
        Ok(self.store.upsert_state(update, deadline)?)
    }

    /// Write a snapshot and an event together, or neither.
    pub fn atomic(
        &self,
        state: &StateUpdate,
        event: &NewEvent,
        deadline: Option<Instant>,
    ) -> CoordinationResult<AppendOutcome> {
        Ok(self.store.atomic_state_and_event(state, event, deadline)?)
    }

    /// Mark a scope sensitive (or clear the mark) and log the change.
    pub fn flag_sensitive(
        &self,
        session_id: &str,
        scope_id: &str,
        sensitive: bool,
    ) -> CoordinationResult<AppendOutcome> {
        let state = StateUpdate::new(
            session_id,
            SCOPE_FLAGS,
            Some(scope_id),
            StateType::Flags,
            json!({ "sensitive": sensitive }),
        );
        let event = NewEvent::new(
            session_id,
            Some(scope_id),
            SENSITIVITY_FLAGGED,
            json!({ "sensitive": sensitive }),
        );
        self.atomic(&state, &event, None)
    }

    /// Queue a work item for batch spawning. Queue position is fixed by the
    /// first enqueue of the id.
    pub fn enqueue_work_item(
        &self,
        session_id: &str,
        item_id: &str,
        payload: serde_json::Value,
    ) -> CoordinationResult<()> {
        self.upsert_state(&StateUpdate::pending_work_item(session_id, item_id, payload), None)
    }

    /// Move a work item out of (or back into) the pending queue.
    pub fn set_work_item_state(
        &self,
        session_id: &str,
        item_id: &str,
        state_type: StateType,
        payload: serde_json::Value,
    ) -> CoordinationResult<()> {
        self.upsert_state(
            &StateUpdate::new(session_id, WORK_ITEM_SCOPE, Some(item_id), state_type, payload),
            None,
        )
    }

    /// Remove a session with all its snapshots and events.
    pub fn delete_session(&self, session_id: &str) -> CoordinationResult<bool> {
        Ok(self.store.delete_session(session_id)?)
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
