//! infocache-core - Core library for infocache
//!
//! Provides the metadata cache store, throttled refresh worker, grace-window
//! eviction tasks and watcher bindings.

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod eviction;
pub mod refresh;
pub mod store;
pub mod watcher;

pub use cache::{InfoCache, InfoCacheBuilder};
pub use config::CacheConfig;
pub use descriptor::{Descriptor, FileDescriptor, FileSnapshot, MetadataHandle};
pub use error::CacheError;
pub use event::{CacheEvent, EventBus};
pub use eviction::{EvictionScheduler, EvictionTarget};
pub use refresh::{RefreshCoordinator, RefreshTarget};
pub use store::CacheStore;
pub use watcher::{
    ChangeKind, ChangeListener, ManualWatcherBinding, NotifyWatcherBinding, ScopeWatcher,
    WatcherBinding,
};

pub use infocache_types::{CacheStats, EvictionReason, ResourceId};
