//! Event bus for infocache using tokio::broadcast
//!
//! Announces refreshes, evictions and watcher failures to interested views.

use infocache_types::{EvictionReason, ResourceId};
use tokio::sync::broadcast;

/// Events emitted by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A cached descriptor re-read its state
    Refreshed(ResourceId),
    /// An entry left the cache without an explicit remove
    Evicted {
        id: ResourceId,
        reason: EvictionReason,
    },
    /// An entry was removed explicitly or released at shutdown
    Removed(ResourceId),
    /// A watcher backend reported an error
    WatcherError(String),
}

/// Event bus for broadcasting cache events
///
/// Uses tokio::broadcast for multi-consumer support. Publishing never blocks
/// and never fails the cache operation that triggered it.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CacheEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}
