//! Cache configuration
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! `INFOCACHE_*` environment variables. Front ends apply their own flags last.
//!
//! ```toml
//! refresh_interval_ms = 500
//! eviction_window_ms = 60000
//! eviction_offset_ms = 1000
//! max_entries = 100000
//! ```

use crate::error::CacheError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Minimum time between two effective refreshes of the same id
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(500);
/// Period of the mark and finalize eviction passes
pub const DEFAULT_EVICTION_WINDOW: Duration = Duration::from_millis(60 * 1000);
/// Delay of the mark pass after the finalize pass
pub const DEFAULT_EVICTION_OFFSET: Duration = Duration::from_millis(1000);
/// Hard bound on resident entries
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

pub const ENV_REFRESH_MS: &str = "INFOCACHE_REFRESH_MS";
pub const ENV_EVICTION_MS: &str = "INFOCACHE_EVICTION_MS";
pub const ENV_EVICTION_OFFSET_MS: &str = "INFOCACHE_EVICTION_OFFSET_MS";
pub const ENV_MAX_ENTRIES: &str = "INFOCACHE_MAX_ENTRIES";

/// Configuration for the metadata cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Throttle interval of the refresh worker
    pub refresh_interval: Duration,

    /// Grace window between staging and finalizing unreferenced entries
    pub eviction_window: Duration,

    /// Offset of the mark pass after the finalize pass
    pub eviction_offset: Duration,

    /// Maximum resident entries before synchronous eviction
    pub max_entries: usize,

    /// Capacity of the cache event channel
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            eviction_window: DEFAULT_EVICTION_WINDOW,
            eviction_offset: DEFAULT_EVICTION_OFFSET,
            max_entries: DEFAULT_MAX_ENTRIES,
            event_capacity: 256,
        }
    }
}

/// On-disk representation, every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    refresh_interval_ms: Option<u64>,
    eviction_window_ms: Option<u64>,
    eviction_offset_ms: Option<u64>,
    max_entries: Option<usize>,
    event_capacity: Option<usize>,
}

impl CacheConfig {
    /// Default config file location (`<config_dir>/infocache/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("infocache").join("config.toml"))
    }

    /// Load defaults overlaid with `path` (if given) and the environment.
    ///
    /// Without an explicit path, the default location is used when it exists.
    /// The result is not validated: later layers (CLI flags) may still fix an
    /// out-of-range value, so call [`validate`](Self::validate) after the last one.
    pub fn load(path: Option<&Path>) -> Result<Self, CacheError> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };
        if let Some(file) = file {
            config = config.merge_file(&file)?;
        }

        config.merge_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from a TOML file
    pub fn merge_file(self, path: &Path) -> Result<Self, CacheError> {
        let content = std::fs::read_to_string(path).map_err(|source| CacheError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = self.merge_toml(&content).map_err(|source| CacheError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Config file merged");
        Ok(config)
    }

    fn merge_toml(mut self, content: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        if let Some(ms) = file.refresh_interval_ms {
            self.refresh_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.eviction_window_ms {
            self.eviction_window = Duration::from_millis(ms);
        }
        if let Some(ms) = file.eviction_offset_ms {
            self.eviction_offset = Duration::from_millis(ms);
        }
        if let Some(n) = file.max_entries {
            self.max_entries = n;
        }
        if let Some(n) = file.event_capacity {
            self.event_capacity = n;
        }
        Ok(self)
    }

    /// Overlay `INFOCACHE_*` variables looked up through `lookup`
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, CacheError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Result<Option<u64>, CacheError> {
            match lookup(key) {
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                    CacheError::invalid_config(format!("{key} must be an integer, got '{raw}'"))
                }),
                None => Ok(None),
            }
        };

        if let Some(ms) = parse(ENV_REFRESH_MS)? {
            self.refresh_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(ENV_EVICTION_MS)? {
            self.eviction_window = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(ENV_EVICTION_OFFSET_MS)? {
            self.eviction_offset = Duration::from_millis(ms);
        }
        if let Some(n) = parse(ENV_MAX_ENTRIES)? {
            self.max_entries = n as usize;
        }
        Ok(self)
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_eviction_window(mut self, window: Duration) -> Self {
        self.eviction_window = window;
        self
    }

    pub fn with_eviction_offset(mut self, offset: Duration) -> Self {
        self.eviction_offset = offset;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.refresh_interval.is_zero() {
            return Err(CacheError::invalid_config("refresh interval must be > 0"));
        }
        if self.eviction_window.is_zero() {
            return Err(CacheError::invalid_config("eviction window must be > 0"));
        }
        if self.eviction_offset >= self.eviction_window {
            return Err(CacheError::invalid_config(format!(
                "eviction offset ({:?}) must be shorter than the eviction window ({:?})",
                self.eviction_offset, self.eviction_window
            )));
        }
        if self.max_entries == 0 {
            return Err(CacheError::invalid_config("max_entries must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(CacheError::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}
