//! InfoCache - composition root owning the store, refresh worker and eviction tasks
//!
//! ```no_run
//! use infocache_core::{FileDescriptor, InfoCache, NotifyWatcherBinding};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let cache = InfoCache::<FileDescriptor>::builder()
//!     .watcher(Arc::new(NotifyWatcherBinding::new()))
//!     .build()?;
//!
//! let id = infocache_types::ResourceId::new("/etc/hosts");
//! cache.put(id.clone(), Arc::new(FileDescriptor::load("/etc/hosts")?));
//! assert!(cache.get(&id).is_some());
//! cache.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::config::CacheConfig;
use crate::descriptor::{Descriptor, MetadataHandle};
use crate::error::CacheError;
use crate::event::{CacheEvent, EventBus};
use crate::eviction::EvictionScheduler;
use crate::store::CacheStore;
use crate::watcher::WatcherBinding;
use infocache_types::{CacheStats, ResourceId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::info;

/// Builder for [`InfoCache`]
pub struct InfoCacheBuilder<D: Descriptor> {
    config: CacheConfig,
    watcher: Option<Arc<dyn WatcherBinding>>,
    event_bus: Option<EventBus>,
    runtime: Option<Handle>,
    _descriptor: std::marker::PhantomData<fn() -> D>,
}

impl<D: Descriptor> Default for InfoCacheBuilder<D> {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            watcher: None,
            event_bus: None,
            runtime: None,
            _descriptor: std::marker::PhantomData,
        }
    }
}

impl<D: Descriptor> InfoCacheBuilder<D> {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend delivering change signals; without one entries are never
    /// invalidated by external changes
    pub fn watcher(mut self, watcher: Arc<dyn WatcherBinding>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Share an existing bus (e.g. one a watcher backend already publishes to)
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Runtime driving the eviction timers (defaults to the current one)
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<InfoCache<D>, CacheError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| CacheError::NoRuntime)?,
        };
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(self.config.event_capacity));

        let store = CacheStore::new(self.config.clone(), self.watcher, event_bus)?;
        let eviction = match EvictionScheduler::start(
            Arc::downgrade(&store),
            self.config.eviction_window,
            self.config.eviction_offset,
            &runtime,
        ) {
            Ok(eviction) => eviction,
            Err(e) => {
                store.stop_refresh_worker();
                return Err(e);
            }
        };

        info!(
            max_entries = self.config.max_entries,
            refresh_ms = self.config.refresh_interval.as_millis() as u64,
            eviction_ms = self.config.eviction_window.as_millis() as u64,
            "InfoCache started"
        );
        Ok(InfoCache {
            store,
            eviction,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// In-process metadata cache
pub struct InfoCache<D: Descriptor> {
    store: Arc<CacheStore<D>>,
    eviction: EvictionScheduler,
    shut_down: AtomicBool,
}

impl<D: Descriptor> InfoCache<D> {
    pub fn builder() -> InfoCacheBuilder<D> {
        InfoCacheBuilder::default()
    }

    /// Build with `config` and no watcher on the current runtime
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::builder().config(config).build()
    }

    pub fn with_watcher(
        config: CacheConfig,
        watcher: Arc<dyn WatcherBinding>,
    ) -> Result<Self, CacheError> {
        Self::builder().config(config).watcher(watcher).build()
    }

    /// Build on an explicit runtime, for callers outside a tokio context
    pub fn with_runtime(
        config: CacheConfig,
        watcher: Option<Arc<dyn WatcherBinding>>,
        runtime: Handle,
    ) -> Result<Self, CacheError> {
        let mut builder = Self::builder().config(config).runtime(runtime);
        if let Some(watcher) = watcher {
            builder = builder.watcher(watcher);
        }
        builder.build()
    }

    pub fn get(&self, id: &ResourceId) -> Option<MetadataHandle<D>> {
        self.store.get(id)
    }

    pub fn put(&self, id: ResourceId, handle: impl Into<Option<MetadataHandle<D>>>) {
        self.store.put(id, handle);
    }

    pub fn remove(&self, id: &ResourceId) -> Option<MetadataHandle<D>> {
        self.store.remove(id)
    }

    pub fn refresh(&self, id: &ResourceId) -> Result<bool, CacheError> {
        self.store.refresh(id)
    }

    pub fn request_refresh(&self, id: &ResourceId) {
        self.store.request_refresh(id);
    }

    pub fn set_cache_disabled(&self, scheme: &str, disabled: bool) {
        self.store.set_cache_disabled(scheme, disabled);
    }

    pub fn is_cache_disabled(&self, scheme: &str) -> bool {
        self.store.is_cache_disabled(scheme)
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.store.event_bus().subscribe()
    }

    pub fn config(&self) -> &CacheConfig {
        self.store.config()
    }

    pub fn store(&self) -> &Arc<CacheStore<D>> {
        &self.store
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the refresh worker, stop the eviction tasks, then release every
    /// entry. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.store.stop_refresh_worker();
        self.eviction.stop();
        let released = self.store.close();
        info!(released, "InfoCache shut down");
    }
}

impl<D: Descriptor> Drop for InfoCache<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ManualWatcherBinding;
    use std::time::Duration;

    struct Inert;

    impl Descriptor for Inert {
        fn refresh(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let result = InfoCache::<Inert>::builder().build();
        assert!(matches!(result, Err(CacheError::NoRuntime)));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let cache =
            InfoCache::<Inert>::with_runtime(CacheConfig::default(), None, runtime.handle().clone())
                .unwrap();

        cache.put(ResourceId::new("/a"), Arc::new(Inert));
        assert!(cache.get(&ResourceId::new("/a")).is_some());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = CacheConfig::default().with_max_entries(0);
        assert!(matches!(
            InfoCache::<Inert>::new(config),
            Err(CacheError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_and_is_idempotent() {
        let binding = Arc::new(ManualWatcherBinding::new());
        let cache = InfoCache::<Inert>::with_watcher(CacheConfig::default(), binding.clone())
            .unwrap();

        cache.put(ResourceId::new("/d/a"), Arc::new(Inert));
        cache.put(ResourceId::new("/d/b"), Arc::new(Inert));
        assert_eq!(binding.watched_scopes(), 1);

        cache.shutdown();
        assert!(cache.is_shut_down());
        assert_eq!(cache.stats().resident, 0);
        assert_eq!(binding.watched_scopes(), 0);
        assert!(!cache.store().refresher().is_running());

        cache.shutdown();
        cache.put(ResourceId::new("/d/c"), Arc::new(Inert));
        assert!(cache.get(&ResourceId::new("/d/c")).is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let binding = Arc::new(ManualWatcherBinding::new());
        {
            let cache = InfoCache::<Inert>::builder()
                .watcher(binding.clone())
                .config(CacheConfig::default().with_refresh_interval(Duration::from_millis(20)))
                .build()
                .unwrap();
            cache.put(ResourceId::new("/d/a"), Arc::new(Inert));
        }
        assert_eq!(binding.watched_scopes(), 0);
        assert_eq!(binding.unsubscribe_calls(), 1);
    }
}
