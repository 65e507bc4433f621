//! infocache-types - Shared data types for infocache
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - infocache-core (cache store, refresh worker, eviction tasks)
//! - infocache (command-line front end)

pub mod models;

pub use models::{CacheStats, EvictionReason, ResourceId};
