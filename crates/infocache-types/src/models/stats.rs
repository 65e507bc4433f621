use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an entry left the cache without an explicit `remove`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Resident count exceeded the configured maximum
    Capacity,
    /// Only the cache held the handle for a whole grace window
    Unreferenced,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Capacity => f.write_str("capacity"),
            EvictionReason::Unreferenced => f.write_str("unreferenced"),
        }
    }
}

/// Point-in-time snapshot of cache bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently resident
    pub resident: usize,
    /// Hard bound on resident entries
    pub max_entries: usize,
    /// Refresh requests deferred by the throttle
    pub pending_refreshes: usize,
    /// Entries staged for unreferenced eviction
    pub eviction_candidates: usize,
    /// Staged entries touched since staging
    pub reprieved: usize,
    /// Parent scopes with a live watcher subscription
    pub watched_scopes: usize,
    /// Schemes for which callers bypass the cache
    pub disabled_schemes: Vec<String>,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl CacheStats {
    /// Fraction of the hard bound in use (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_entries == 0 {
            return 0.0;
        }
        self.resident as f64 / self.max_entries as f64
    }

    pub fn is_empty(&self) -> bool {
        self.resident == 0
    }
}
