//! Event history and replay functionality
//!
//! Read-side view over the event log for recovery and debugging: replay a
//! session's events in append order, pull back the routing decisions made
//! for a scope, and aggregate statistics.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::types::{is_decision_event, PIPELINE_COMPLETED, UNKNOWN_TRANSITION};
use crate::escalation::OverrideKind;
use crate::router::RouterDecision;
use crate::state::{EventRecord, SharedStateStore, StoreError};

/// Error type for history operations
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event parsing error: {0}")]
    ParseError(String),
}

impl HistoryError {
    /// Transient store failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HistoryError::Store(e) if e.is_retryable())
    }
}

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Event history manager for replay and querying
pub struct EventHistory {
    store: SharedStateStore,
}

impl EventHistory {
    /// Create a new event history manager
    pub fn new(store: SharedStateStore) -> Self {
        Self { store }
    }

    /// All events of a session in append order
    pub fn session_events(&self, session_id: &str) -> HistoryResult<Vec<EventRecord>> {
        let events = self.store.session_events(session_id, None)?;
        debug!(session_id, count = events.len(), "Retrieved session events");
        Ok(events)
    }

    /// Events of one scope in append order
    pub fn scope_events(&self, session_id: &str, scope_id: &str) -> HistoryResult<Vec<EventRecord>> {
        Ok(self.store.scope_events(session_id, scope_id)?)
    }

    /// Routing decisions recorded for a scope, oldest first
    pub fn decisions(&self, session_id: &str, scope_id: &str) -> HistoryResult<Vec<RouterDecision>> {
        self.scope_events(session_id, scope_id)?
            .into_iter()
            .filter(|e| is_decision_event(&e.event_type))
            .map(|e| {
                serde_json::from_value(e.payload)
                    .map_err(|err| HistoryError::ParseError(format!("event {}: {err}", e.id)))
            })
            .collect()
    }

    /// Most recent routing decision for a scope
    pub fn last_decision(&self, session_id: &str, scope_id: &str) -> HistoryResult<Option<RouterDecision>> {
        Ok(self.decisions(session_id, scope_id)?.pop())
    }

    /// Consecutive most recent decisions for a scope that reported one of
    /// `failure_statuses`
    pub fn failure_streak(
        &self,
        session_id: &str,
        scope_id: &str,
        failure_statuses: &[String],
    ) -> HistoryResult<u32> {
        Ok(self.store.failure_streak(session_id, scope_id, failure_statuses)?)
    }

    /// Replay a session's events through a callback
    pub fn replay<F>(&self, session_id: &str, mut callback: F) -> HistoryResult<ReplayStats>
    where
        F: FnMut(&EventRecord),
    {
        let events = self.session_events(session_id)?;
        info!(session_id, total = events.len(), "Starting event replay");

        let mut stats = ReplayStats::new();
        for event in &events {
            stats.record_event(event);
            callback(event);
        }

        info!(
            total = stats.total_events,
            scopes = stats.scopes_seen,
            decisions = stats.decisions_seen,
            "Event replay complete"
        );
        Ok(stats)
    }

    /// Aggregate statistics for a session
    pub fn stats(&self, session_id: &str) -> HistoryResult<EventStats> {
        let events = self.session_events(session_id)?;
        Ok(EventStats::from_events(&events))
    }
}

/// Statistics from replay
#[derive(Debug, Default)]
pub struct ReplayStats {
    pub total_events: usize,
    pub scopes_seen: usize,
    pub decisions_seen: usize,
    scopes: BTreeSet<String>,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: &EventRecord) {
        self.total_events += 1;

        if self.scopes.insert(event.scope_id.clone()) {
            self.scopes_seen += 1;
        }

        if is_decision_event(&event.event_type) {
            self.decisions_seen += 1;
        }
    }
}

/// Aggregate statistics for events
#[derive(Debug, Default, serde::Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub unique_scopes: usize,
    pub routing_decisions: usize,
    pub unknown_transitions: usize,
    pub escalations: usize,
    pub sensitivity_overrides: usize,
    pub redacted_events: usize,
    pub completions: usize,
}

impl EventStats {
    pub fn from_events(events: &[EventRecord]) -> Self {
        let mut stats = Self::default();
        let mut scopes = BTreeSet::new();

        for event in events {
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type.clone())
                .or_insert(0) += 1;
            scopes.insert(event.scope_id.as_str());

            if event.redacted {
                stats.redacted_events += 1;
            }
            if event.event_type == PIPELINE_COMPLETED {
                stats.completions += 1;
            }
            if event.event_type == UNKNOWN_TRANSITION {
                stats.unknown_transitions += 1;
            }
            if is_decision_event(&event.event_type) {
                stats.routing_decisions += 1;
                if let Ok(decision) = serde_json::from_value::<RouterDecision>(event.payload.clone()) {
                    if decision.override_fired(OverrideKind::FailureEscalation) {
                        stats.escalations += 1;
                    }
                    if decision.override_fired(OverrideKind::SensitivityOverride) {
                        stats.sensitivity_overrides += 1;
                    }
                }
            }
        }

        stats.unique_scopes = scopes.len();
        stats
    }
}

/// Builder for replaying a filtered slice of a session's events
pub struct ReplayBuilder {
    store: SharedStateStore,
    session_id: String,
    since: Option<DateTime<Utc>>,
    filter_scope: Option<String>,
    filter_types: Option<Vec<String>>,
}

impl ReplayBuilder {
    /// Create a new replay builder
    pub fn new(store: SharedStateStore, session_id: &str) -> Self {
        Self {
            store,
            session_id: session_id.to_string(),
            since: None,
            filter_scope: None,
            filter_types: None,
        }
    }

    /// Only events recorded at or after `since`
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Filter by scope ID
    pub fn scope(mut self, scope_id: &str) -> Self {
        self.filter_scope = Some(scope_id.to_string());
        self
    }

    /// Filter by event types
    pub fn event_types(mut self, types: Vec<&str>) -> Self {
        self.filter_types = Some(types.into_iter().map(String::from).collect());
        self
    }

    /// Execute replay and collect events
    pub fn collect(self) -> HistoryResult<Vec<EventRecord>> {
        let history = EventHistory::new(self.store);
        let mut events = history.session_events(&self.session_id)?;

        if let Some(since) = self.since {
            events.retain(|e| e.created_at >= since);
        }

        if let Some(ref scope_id) = self.filter_scope {
            events.retain(|e| &e.scope_id == scope_id);
        }

        if let Some(ref types) = self.filter_types {
            events.retain(|e| types.contains(&e.event_type));
        }

        Ok(events)
    }
}
