//! CLI helpers: configuration layering, tree population and output formatting

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table};
use infocache_core::{
    CacheConfig, CacheEvent, CacheStats, FileDescriptor, InfoCache, ResourceId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

// ============================================================================
// Configuration
// ============================================================================

/// Command-line overrides applied on top of file and environment config
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub max_entries: Option<usize>,
    pub refresh_ms: Option<u64>,
    pub eviction_ms: Option<u64>,
}

/// Build the effective config: defaults → TOML file → environment → flags
pub fn resolve_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<CacheConfig> {
    let mut config = CacheConfig::load(path).context("Failed to load configuration")?;

    if let Some(n) = overrides.max_entries {
        config = config.with_max_entries(n);
    }
    if let Some(ms) = overrides.refresh_ms {
        config = config.with_refresh_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = overrides.eviction_ms {
        config = config.with_eviction_window(Duration::from_millis(ms));
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// ============================================================================
// Tree population
// ============================================================================

/// Outcome of caching a directory tree
#[derive(Debug, Default)]
pub struct PopulateReport {
    pub cached: usize,
    pub failed: usize,
    /// Handles kept alive by the caller so entries are not evicted as unreferenced
    pub handles: Vec<Arc<FileDescriptor>>,
}

/// Paths under `root` (excluding `root` itself) down to `depth` levels
pub fn collect_paths(root: &Path, depth: usize) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let paths = WalkDir::new(root)
        .min_depth(1)
        .max_depth(depth.max(1))
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .collect();
    Ok(paths)
}

/// Cache a descriptor for every path, optionally keeping the handles
pub fn populate(cache: &InfoCache<FileDescriptor>, paths: &[PathBuf], hold: bool) -> PopulateReport {
    let mut report = PopulateReport::default();

    for path in paths {
        match FileDescriptor::load(path.as_path()) {
            Ok(descriptor) => {
                let handle = Arc::new(descriptor);
                cache.put(ResourceId::from_path(path), Arc::clone(&handle));
                if hold {
                    report.handles.push(handle);
                }
                report.cached += 1;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Descriptor load failed");
                report.failed += 1;
            }
        }
    }
    report
}

// ============================================================================
// Formatters
// ============================================================================

/// Format cache statistics as table (human) or JSON
pub fn format_stats(stats: &CacheStats, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(stats).unwrap_or_else(|_| "{}".to_string());
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    if no_color {
        table.set_header(vec!["Metric", "Value"]);
    } else {
        table.set_header(vec![
            Cell::new("Metric").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    }

    let disabled = if stats.disabled_schemes.is_empty() {
        "-".to_string()
    } else {
        stats.disabled_schemes.join(", ")
    };
    let rows = [
        ("Resident entries", stats.resident.to_string()),
        ("Max entries", stats.max_entries.to_string()),
        ("Utilization", format!("{:.1}%", stats.utilization() * 100.0)),
        ("Pending refreshes", stats.pending_refreshes.to_string()),
        ("Eviction candidates", stats.eviction_candidates.to_string()),
        ("Reprieved", stats.reprieved.to_string()),
        ("Watched scopes", stats.watched_scopes.to_string()),
        ("Cache disabled for", disabled),
        (
            "Captured at",
            stats.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
    ];
    for (metric, value) in rows {
        table.add_row(vec![metric.to_string(), value]);
    }

    table.to_string()
}

/// One-line rendering of a cache event for the `watch` log
pub fn format_event(event: &CacheEvent) -> String {
    match event {
        CacheEvent::Refreshed(id) => format!("refreshed  {}", shorten_id(id)),
        CacheEvent::Evicted { id, reason } => format!("evicted    {} ({reason})", shorten_id(id)),
        CacheEvent::Removed(id) => format!("removed    {}", shorten_id(id)),
        CacheEvent::WatcherError(message) => format!("watcher    error: {message}"),
    }
}

// ============================================================================
// Utilities
// ============================================================================

fn shorten_id(id: &ResourceId) -> String {
    // Keep the last 2 path components
    let parts: Vec<&str> = id.path().split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() > 2 {
        format!("…/{}", parts[parts.len() - 2..].join("/"))
    } else {
        id.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
