//! Data models shared between infocache crates

pub mod resource_id;
pub mod stats;

pub use resource_id::ResourceId;
pub use stats::{CacheStats, EvictionReason};
