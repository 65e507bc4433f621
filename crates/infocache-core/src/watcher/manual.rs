use super::{ChangeKind, ScopeChannel, ScopeWatcher, WatcherBinding};
use crate::error::CacheError;
use dashmap::{DashMap, DashSet};
use infocache_types::ResourceId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Deterministic in-memory watcher backend.
///
/// Nothing is observed on its own: signals are delivered when the owner calls
/// [`emit`](ManualWatcherBinding::emit). Useful for embedding the cache over
/// resources that have no OS-level watcher, and for tests.
#[derive(Default)]
pub struct ManualWatcherBinding {
    scopes: DashMap<ResourceId, Arc<ScopeChannel>>,
    failing: DashSet<ResourceId>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl ManualWatcherBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change signal for `changed` to listeners of `scope`.
    ///
    /// Returns the number of listeners invoked (0 when the scope is not watched).
    pub fn emit(&self, scope: &ResourceId, kind: ChangeKind, changed: &ResourceId) -> usize {
        // Clone out of the map so listeners may unsubscribe while running
        let channel = self.scopes.get(scope).map(|entry| Arc::clone(entry.value()));
        match channel {
            Some(channel) => channel.dispatch(kind, changed),
            None => {
                trace!(%scope, ?kind, "Signal for unwatched scope dropped");
                0
            }
        }
    }

    /// Deliver a change signal to the scope `changed` lives in
    pub fn emit_for(&self, changed: &ResourceId, kind: ChangeKind) -> usize {
        match changed.parent() {
            Some(scope) => self.emit(&scope, kind, changed),
            None => 0,
        }
    }

    /// Make future subscriptions to `scope` fail
    pub fn fail_scope(&self, scope: &ResourceId) {
        self.failing.insert(scope.clone());
    }

    pub fn is_watching(&self, scope: &ResourceId) -> bool {
        self.scopes.contains_key(scope)
    }

    pub fn watched_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// Listeners connected to `scope` (0 when unwatched)
    pub fn listener_count(&self, scope: &ResourceId) -> usize {
        self.scopes
            .get(scope)
            .map(|entry| entry.value().listener_count())
            .unwrap_or(0)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

impl WatcherBinding for ManualWatcherBinding {
    fn subscribe(&self, scope: &ResourceId) -> Result<Arc<dyn ScopeWatcher>, CacheError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(scope) {
            return Err(CacheError::watch(scope, "subscription refused"));
        }

        let channel = self
            .scopes
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(ScopeChannel::new(scope.clone())))
            .value()
            .clone();
        Ok(channel)
    }

    fn unsubscribe(&self, scope: &ResourceId) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, channel)) = self.scopes.remove(scope) {
            channel.disconnect_all();
        }
    }
}
