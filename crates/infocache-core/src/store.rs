//! Cache store: id → handle mapping, access order and watcher bookkeeping
//!
//! A single `parking_lot::Mutex` guards the mapping, the access order, the
//! eviction-tracking sets and the per-scope subscription counts. The disabled
//! scheme set lives behind its own `RwLock` since it is read far more often
//! than it is written and never interacts with entry state.
//!
//! Lock order is store → refresh coordinator. Descriptor refreshes and event
//! publication run after the store lock is released.

use crate::config::CacheConfig;
use crate::descriptor::{Descriptor, MetadataHandle};
use crate::error::CacheError;
use crate::event::{CacheEvent, EventBus};
use crate::eviction::EvictionTarget;
use crate::refresh::{RefreshCoordinator, RefreshTarget};
use crate::watcher::{ChangeKind, ChangeListener, ScopeWatcher, WatcherBinding};
use chrono::Utc;
use infocache_types::{CacheStats, EvictionReason, ResourceId};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

struct CacheEntry<D> {
    handle: Arc<D>,
    /// Parent scope whose subscription count this entry holds
    scope: Option<ResourceId>,
}

struct ScopeSubscription {
    watcher: Arc<dyn ScopeWatcher>,
    count: usize,
}

struct StoreState<D> {
    /// Mapping and access order in one structure (front = least recently touched)
    entries: LruCache<ResourceId, CacheEntry<D>>,
    /// Staged by the mark pass
    candidates: HashSet<ResourceId>,
    /// Staged ids touched after staging
    reprieved: HashSet<ResourceId>,
    subscriptions: HashMap<ResourceId, ScopeSubscription>,
    closed: bool,
}

impl<D> StoreState<D> {
    /// Move `id` to the back of the access order and reprieve it if staged
    fn touch(&mut self, id: &ResourceId) -> Option<Arc<D>> {
        let handle = Arc::clone(&self.entries.get(id)?.handle);

        if self.candidates.contains(id) {
            trace!(%id, "Staged entry touched, reprieved");
            self.reprieved.insert(id.clone());
        }
        Some(handle)
    }
}

/// Thread-safe metadata cache store
pub struct CacheStore<D: Descriptor> {
    config: CacheConfig,
    state: Mutex<StoreState<D>>,
    disabled_schemes: RwLock<HashSet<String>>,
    watcher: Option<Arc<dyn WatcherBinding>>,
    refresher: RefreshCoordinator,
    event_bus: EventBus,
    this: Weak<CacheStore<D>>,
}

impl<D: Descriptor> CacheStore<D> {
    /// Create a store and start its refresh worker.
    ///
    /// Without a watcher binding, entries are only refreshed on request and
    /// evicted by the size bound or the eviction passes.
    pub fn new(
        config: CacheConfig,
        watcher: Option<Arc<dyn WatcherBinding>>,
        event_bus: EventBus,
    ) -> Result<Arc<Self>, CacheError> {
        config.validate()?;

        let store = Arc::new_cyclic(|this| Self {
            refresher: RefreshCoordinator::new(config.refresh_interval),
            state: Mutex::new(StoreState {
                entries: LruCache::unbounded(),
                candidates: HashSet::new(),
                reprieved: HashSet::new(),
                subscriptions: HashMap::new(),
                closed: false,
            }),
            disabled_schemes: RwLock::new(HashSet::new()),
            config,
            watcher,
            event_bus,
            this: this.clone(),
        });

        store.refresher.spawn(Arc::downgrade(&store))?;
        debug!(
            max_entries = store.config.max_entries,
            watching = store.watcher.is_some(),
            "Cache store created"
        );
        Ok(store)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    // ===================
    // Caller operations
    // ===================

    /// Look up `id`, touching its access order
    pub fn get(&self, id: &ResourceId) -> Option<MetadataHandle<D>> {
        let handle = self.state.lock().touch(id);
        trace!(%id, hit = handle.is_some(), "Cache lookup");
        handle
    }

    /// Insert or overwrite `id`. An empty handle is ignored.
    pub fn put(&self, id: ResourceId, handle: impl Into<Option<MetadataHandle<D>>>) {
        let Some(handle) = handle.into() else {
            debug!(%id, "Ignoring put of empty handle");
            return;
        };

        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                warn!(%id, "Put after shutdown ignored");
                return;
            }

            let resident_scope = state.entries.peek(&id).map(|existing| existing.scope.clone());
            let scope = match resident_scope {
                Some(scope) => scope,
                None => self.subscribe_scope(&mut state, &id),
            };
            state.entries.put(
                id.clone(),
                CacheEntry {
                    handle,
                    scope,
                },
            );
            if state.candidates.contains(&id) {
                state.reprieved.insert(id.clone());
            }
            self.refresher.record(&id);
            trace!(%id, resident = state.entries.len(), "Entry cached");

            if state.entries.len() > self.config.max_entries {
                let victim = state.entries.peek_lru().map(|(oldest, _)| oldest.clone());
                victim.and_then(|victim| {
                    let released = self.remove_locked(&mut state, &victim)?;
                    Some((victim, released))
                })
            } else {
                None
            }
        };

        if let Some((victim, released)) = evicted {
            drop(released);
            debug!(id = %victim, "Evicted least recently touched entry");
            self.event_bus.publish(CacheEvent::Evicted {
                id: victim,
                reason: EvictionReason::Capacity,
            });
        }
    }

    /// Remove `id`, releasing its watcher subscription
    pub fn remove(&self, id: &ResourceId) -> Option<MetadataHandle<D>> {
        let removed = self.remove_locked(&mut self.state.lock(), id);
        if removed.is_some() {
            debug!(%id, "Entry removed");
            self.event_bus.publish(CacheEvent::Removed(id.clone()));
        }
        removed
    }

    /// Re-populate the cached descriptor for `id` in place.
    ///
    /// Returns `Ok(false)` when `id` is not resident; its throttle bookkeeping
    /// is dropped as a stale reference.
    pub fn refresh(&self, id: &ResourceId) -> Result<bool, CacheError> {
        let handle = self.state.lock().touch(id);
        let Some(handle) = handle else {
            self.refresher.forget(id);
            trace!(%id, "Refresh of non-resident id");
            return Ok(false);
        };

        handle.refresh().map_err(|e| CacheError::Refresh {
            id: id.clone(),
            message: format!("{e:#}"),
        })?;

        self.event_bus.publish(CacheEvent::Refreshed(id.clone()));
        Ok(true)
    }

    /// Throttled refresh: runs now if allowed, otherwise on the worker
    pub fn request_refresh(&self, id: &ResourceId) {
        self.refresher.request_refresh(self, id);
    }

    pub fn set_cache_disabled(&self, scheme: &str, disabled: bool) {
        let mut schemes = self.disabled_schemes.write();
        let changed = if disabled {
            schemes.insert(scheme.to_string())
        } else {
            schemes.remove(scheme)
        };
        if changed {
            debug!(scheme, disabled, "Cache bypass toggled");
        }
    }

    pub fn is_cache_disabled(&self, scheme: &str) -> bool {
        self.disabled_schemes.read().contains(scheme)
    }

    // ===================
    // Read accessors
    // ===================

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.state.lock().entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident ids from least to most recently touched
    pub fn access_order(&self) -> Vec<ResourceId> {
        let state = self.state.lock();
        state.entries.iter().rev().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_eviction_candidate(&self, id: &ResourceId) -> bool {
        self.state.lock().candidates.contains(id)
    }

    /// Number of resident entries holding a subscription on `scope`
    pub fn scope_refcount(&self, scope: &ResourceId) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(scope)
            .map(|sub| sub.count)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let (resident, eviction_candidates, reprieved, watched_scopes) = {
            let state = self.state.lock();
            (
                state.entries.len(),
                state.candidates.len(),
                state.reprieved.len(),
                state.subscriptions.len(),
            )
        };
        let mut disabled_schemes: Vec<String> =
            self.disabled_schemes.read().iter().cloned().collect();
        disabled_schemes.sort();

        CacheStats {
            resident,
            max_entries: self.config.max_entries,
            pending_refreshes: self.refresher.pending_len(),
            eviction_candidates,
            reprieved,
            watched_scopes,
            disabled_schemes,
            captured_at: Utc::now(),
        }
    }

    // ===================
    // Lifecycle
    // ===================

    /// Stop the refresh worker (blocks up to one throttle interval)
    pub fn stop_refresh_worker(&self) {
        self.refresher.stop();
    }

    /// Remove every entry through `remove`. Returns the count removed.
    pub fn clear(&self) -> usize {
        let ids: Vec<ResourceId> = {
            let state = self.state.lock();
            state.entries.iter().map(|(id, _)| id.clone()).collect()
        };

        ids.iter().filter(|id| self.remove(id).is_some()).count()
    }

    /// Release every entry and reject further inserts. Returns the count released.
    pub fn close(&self) -> usize {
        self.state.lock().closed = true;
        let released = self.clear();
        info!(released, "Cache store closed");
        released
    }

    // ===================
    // Internals
    // ===================

    fn remove_locked(&self, state: &mut StoreState<D>, id: &ResourceId) -> Option<Arc<D>> {
        self.refresher.forget(id);
        state.candidates.remove(id);
        state.reprieved.remove(id);

        let entry = state.entries.pop(id)?;
        if let Some(scope) = &entry.scope {
            self.release_scope(state, scope);
        }
        Some(entry.handle)
    }

    /// Count `id` against its parent scope, subscribing on first use
    fn subscribe_scope(&self, state: &mut StoreState<D>, id: &ResourceId) -> Option<ResourceId> {
        let binding = self.watcher.as_ref()?;
        let scope = id.parent()?;

        if let Some(sub) = state.subscriptions.get_mut(&scope) {
            sub.count += 1;
            return Some(scope);
        }

        match binding.subscribe(&scope) {
            Ok(watcher) => {
                for kind in ChangeKind::ALL {
                    watcher.connect(kind, self.change_listener());
                }
                debug!(%scope, "Scope subscribed");
                state
                    .subscriptions
                    .insert(scope.clone(), ScopeSubscription { watcher, count: 1 });
                Some(scope)
            }
            Err(e) => {
                warn!(
                    %scope,
                    error = %e,
                    "Watcher subscription failed, entry only refreshed on request"
                );
                None
            }
        }
    }

    fn release_scope(&self, state: &mut StoreState<D>, scope: &ResourceId) {
        let Some(sub) = state.subscriptions.get_mut(scope) else {
            return;
        };
        sub.count = sub.count.saturating_sub(1);
        if sub.count > 0 {
            return;
        }

        if let Some(sub) = state.subscriptions.remove(scope) {
            sub.watcher.disconnect_all();
        }
        if let Some(binding) = &self.watcher {
            binding.unsubscribe(scope);
        }
        debug!(%scope, "Scope unsubscribed");
    }

    fn change_listener(&self) -> ChangeListener {
        let store = self.this.clone();
        Arc::new(move |kind: ChangeKind, changed: &ResourceId| {
            if let Some(store) = store.upgrade() {
                trace!(%changed, ?kind, "Change signal");
                store.request_refresh(changed);
            }
        })
    }
}

impl<D: Descriptor> RefreshTarget for CacheStore<D> {
    fn refresh_entry(&self, id: &ResourceId) -> Result<bool, CacheError> {
        self.refresh(id)
    }
}

impl<D: Descriptor> EvictionTarget for CacheStore<D> {
    fn mark_unreferenced(&self) -> usize {
        let mut state = self.state.lock();
        let StoreState {
            entries,
            candidates,
            ..
        } = &mut *state;

        let mut staged = 0;
        for (id, entry) in entries.iter() {
            if Arc::strong_count(&entry.handle) <= 1 && candidates.insert(id.clone()) {
                staged += 1;
            }
        }
        debug!(staged, candidates = candidates.len(), "Eviction mark pass");
        staged
    }

    fn finalize_candidates(&self) -> Vec<ResourceId> {
        let (evicted, released) = {
            let mut state = self.state.lock();
            let staged: Vec<ResourceId> = state.candidates.drain().collect();
            let mut evicted = Vec::new();
            let mut released = Vec::new();

            for id in staged {
                if state.reprieved.remove(&id) {
                    trace!(%id, "Eviction cancelled by reprieve");
                    continue;
                }
                if let Some(handle) = self.remove_locked(&mut state, &id) {
                    released.push(handle);
                    evicted.push(id);
                }
            }
            (evicted, released)
        };
        drop(released);

        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "Eviction finalize pass");
        }
        for id in &evicted {
            self.event_bus.publish(CacheEvent::Evicted {
                id: id.clone(),
                reason: EvictionReason::Unreferenced,
            });
        }
        evicted
    }
}

impl<D: Descriptor> Drop for CacheStore<D> {
    fn drop(&mut self) {
        self.refresher.stop();

        let state = self.state.get_mut();
        for (scope, sub) in state.subscriptions.drain() {
            sub.watcher.disconnect_all();
            if let Some(binding) = &self.watcher {
                binding.unsubscribe(&scope);
            }
        }
    }
}
