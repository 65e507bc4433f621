//! Error types for infocache-core
//!
//! Absence is never an error here: `get` and `refresh` report a missing entry
//! as an empty result. These variants cover configuration, watcher and worker
//! failures, which callers may choose to degrade around.

use infocache_types::ResourceId;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for infocache operations
#[derive(Error, Debug)]
pub enum CacheError {
    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    // ===================
    // Watch Errors
    // ===================
    #[error("Watcher error for scope {scope}: {message}")]
    Watch {
        scope: ResourceId,
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    // ===================
    // Refresh Errors
    // ===================
    #[error("Failed to refresh {id}: {message}")]
    Refresh { id: ResourceId, message: String },

    #[error("Failed to spawn refresh worker")]
    WorkerSpawn {
        #[source]
        source: std::io::Error,
    },

    // ===================
    // Scheduling Errors
    // ===================
    #[error("No tokio runtime available to drive eviction timers")]
    NoRuntime,
}

impl CacheError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        CacheError::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn watch(scope: &ResourceId, message: impl Into<String>) -> Self {
        CacheError::Watch {
            scope: scope.clone(),
            message: message.into(),
            source: None,
        }
    }
}
