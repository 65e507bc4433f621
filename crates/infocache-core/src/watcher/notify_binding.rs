use super::{ChangeKind, ScopeChannel, ScopeWatcher, WatcherBinding};
use crate::error::CacheError;
use crate::event::{CacheEvent, EventBus};
use dashmap::DashMap;
use infocache_types::ResourceId;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, trace};

struct WatchedScope {
    /// Dropping the watcher stops OS notifications for the scope
    _watcher: Mutex<RecommendedWatcher>,
    channel: Arc<ScopeChannel>,
}

/// Watcher backend for `file://` scopes using `notify`.
///
/// Each scope directory gets its own non-recursive watcher; listeners run on
/// notify's event thread.
#[derive(Default)]
pub struct NotifyWatcherBinding {
    scopes: DashMap<ResourceId, WatchedScope>,
    event_bus: Option<EventBus>,
}

impl NotifyWatcherBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish backend errors as [`CacheEvent::WatcherError`]
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn watched_scopes(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_watching(&self, scope: &ResourceId) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Map a notify event to change signals, one per affected path
    fn translate(event: &Event) -> Vec<(ChangeKind, ResourceId)> {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::ChildCreated,
            EventKind::Remove(_) => ChangeKind::Deleted,
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
            EventKind::Modify(_) => ChangeKind::AttributeChanged,
            _ => return Vec::new(),
        };

        event
            .paths
            .iter()
            .map(|path| (kind, ResourceId::from_path(path)))
            .collect()
    }
}

impl WatcherBinding for NotifyWatcherBinding {
    fn subscribe(&self, scope: &ResourceId) -> Result<Arc<dyn ScopeWatcher>, CacheError> {
        if let Some(existing) = self.scopes.get(scope) {
            let channel: Arc<ScopeChannel> = Arc::clone(&existing.channel);
            return Ok(channel);
        }

        let dir = scope
            .to_path()
            .ok_or_else(|| CacheError::watch(scope, "only file:// scopes can be watched"))?;

        let channel = Arc::new(ScopeChannel::new(scope.clone()));
        let handler_channel = Arc::clone(&channel);
        let event_bus = self.event_bus.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for (kind, changed) in Self::translate(&event) {
                        trace!(%changed, ?kind, "File change signal");
                        handler_channel.dispatch(kind, &changed);
                    }
                }
                Err(e) => {
                    error!(error = %e, "File watcher error");
                    if let Some(bus) = &event_bus {
                        bus.publish(CacheEvent::WatcherError(e.to_string()));
                    }
                }
            })
            .map_err(|source| CacheError::Watch {
                scope: scope.clone(),
                message: "failed to create watcher".to_string(),
                source: Some(source),
            })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| CacheError::Watch {
                scope: scope.clone(),
                message: format!("failed to watch {}", dir.display()),
                source: Some(source),
            })?;

        debug!(path = %dir.display(), "Watching scope");
        self.scopes.insert(
            scope.clone(),
            WatchedScope {
                _watcher: Mutex::new(watcher),
                channel: Arc::clone(&channel),
            },
        );
        Ok(channel)
    }

    fn unsubscribe(&self, scope: &ResourceId) {
        if let Some((_, watched)) = self.scopes.remove(scope) {
            watched.channel.disconnect_all();
            debug!(%scope, "Scope unwatched");
        }
    }
}
