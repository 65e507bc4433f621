//! Change notification contract between the cache and watcher backends
//!
//! The cache subscribes once per parent scope and keeps its own reference
//! count of resident entries under that scope. Backends only have to deliver
//! four kinds of change signals for ids inside a subscribed scope.
//!
//! Backends:
//! - [`ManualWatcherBinding`]: in-memory, signals are emitted explicitly
//! - [`NotifyWatcherBinding`]: local directories watched through `notify`

mod manual;
mod notify_binding;

pub use manual::ManualWatcherBinding;
pub use notify_binding::NotifyWatcherBinding;

use crate::error::CacheError;
use infocache_types::ResourceId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// Change signals a scope watcher delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Deleted,
    AttributeChanged,
    ChildCreated,
    Renamed,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 4] = [
        ChangeKind::Deleted,
        ChangeKind::AttributeChanged,
        ChangeKind::ChildCreated,
        ChangeKind::Renamed,
    ];
}

/// Callback receiving the id a change signal refers to
pub type ChangeListener = Arc<dyn Fn(ChangeKind, &ResourceId) + Send + Sync>;

/// Shared watcher of one parent scope
pub trait ScopeWatcher: Send + Sync {
    /// Route signals of `kind` to `listener`
    fn connect(&self, kind: ChangeKind, listener: ChangeListener);

    /// Drop every connected listener
    fn disconnect_all(&self);
}

/// Supplier of per-scope watchers
pub trait WatcherBinding: Send + Sync {
    /// Start (or join) watching `scope`
    fn subscribe(&self, scope: &ResourceId) -> Result<Arc<dyn ScopeWatcher>, CacheError>;

    /// Stop watching `scope`; called once the last cached entry under it leaves
    fn unsubscribe(&self, scope: &ResourceId);
}

/// Listener registry shared by the bundled backends
pub struct ScopeChannel {
    scope: ResourceId,
    listeners: RwLock<Vec<(ChangeKind, ChangeListener)>>,
}

impl ScopeChannel {
    pub fn new(scope: ResourceId) -> Self {
        Self {
            scope,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke listeners connected to `kind`; returns how many were called.
    ///
    /// Listeners run on the calling thread, outside the registry lock.
    pub fn dispatch(&self, kind: ChangeKind, changed: &ResourceId) -> usize {
        let targets: Vec<ChangeListener> = self
            .listeners
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!(
            scope = %self.scope,
            %changed,
            ?kind,
            listeners = targets.len(),
            "Dispatching change signal"
        );
        for listener in &targets {
            listener(kind, changed);
        }
        targets.len()
    }
}

impl ScopeWatcher for ScopeChannel {
    fn connect(&self, kind: ChangeKind, listener: ChangeListener) {
        self.listeners.write().push((kind, listener));
    }

    fn disconnect_all(&self) {
        self.listeners.write().clear();
    }
}
