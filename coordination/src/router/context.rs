//! Read-only store queries the router needs while evaluating.

use std::time::Instant;

use crate::state::{StateStore, StoreResult};

/// Everything the router may ask of persisted state.
///
/// Implemented by [`StateStore`] and [`StoreContext`]; tests use in-memory fakes.
pub trait RoutingContext {
    /// Most recent consecutive decisions for the scope whose status is a failure.
    fn failure_streak(&self, session_id: &str, scope_id: &str, failure_statuses: &[String]) -> StoreResult<u32>;

    fn is_sensitive(&self, session_id: &str, scope_id: &str) -> StoreResult<bool>;

    /// Up to `limit` pending work item ids, oldest first.
    fn pending_work_items(&self, session_id: &str, limit: u32) -> StoreResult<Vec<String>>;

    /// Whether any work item is still pending or in progress.
    fn has_unfinished_work(&self, session_id: &str) -> StoreResult<bool>;
}

impl RoutingContext for StateStore {
    fn failure_streak(&self, session_id: &str, scope_id: &str, failure_statuses: &[String]) -> StoreResult<u32> {
        StateStore::failure_streak(self, session_id, scope_id, failure_statuses)
    }

    fn is_sensitive(&self, session_id: &str, scope_id: &str) -> StoreResult<bool> {
        StateStore::is_sensitive(self, session_id, scope_id)
    }

    fn pending_work_items(&self, session_id: &str, limit: u32) -> StoreResult<Vec<String>> {
        StateStore::pending_work_items(self, session_id, limit)
    }

    fn has_unfinished_work(&self, session_id: &str) -> StoreResult<bool> {
        StateStore::has_unfinished_work(self, session_id)
    }
}

/// Store reads that all share one deadline.
pub struct StoreContext<'a> {
    store: &'a StateStore,
    deadline: Instant,
}

impl<'a> StoreContext<'a> {
    pub fn new(store: &'a StateStore, deadline: Instant) -> Self {
        Self { store, deadline }
    }
}

impl RoutingContext for StoreContext<'_> {
    fn failure_streak(&self, session_id: &str, scope_id: &str, failure_statuses: &[String]) -> StoreResult<u32> {
        self.store
            .failure_streak_until(session_id, scope_id, failure_statuses, self.deadline)
    }

    fn is_sensitive(&self, session_id: &str, scope_id: &str) -> StoreResult<bool> {
        self.store.is_sensitive_until(session_id, scope_id, self.deadline)
    }

    fn pending_work_items(&self, session_id: &str, limit: u32) -> StoreResult<Vec<String>> {
        self.store
            .pending_work_items_until(session_id, limit, self.deadline)
    }

    fn has_unfinished_work(&self, session_id: &str) -> StoreResult<bool> {
        self.store.has_unfinished_work_until(session_id, self.deadline)
    }
}
