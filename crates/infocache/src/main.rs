//! infocache - Metadata cache for local directory trees

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::ConfigOverrides;
use infocache_core::{EventBus, FileDescriptor, InfoCache, NotifyWatcherBinding};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "infocache",
    version,
    about = "Metadata cache with watcher-driven refresh and grace-window eviction",
    long_about = "Caches file descriptors for a directory tree, refreshes them when the\n\
                  filesystem reports changes, and evicts entries nobody else references.\n\
                  \n\
                  Examples:\n\
                    infocache scan ~/projects             # Cache one level, print stats\n\
                    infocache scan ~/projects -d 3 --json # Three levels, JSON stats\n\
                    infocache watch ~/projects            # Log refresh/eviction activity\n\
                  \n\
                  Environment Variables:\n\
                    INFOCACHE_CONFIG                      # Config file path\n\
                    INFOCACHE_REFRESH_MS                  # Refresh throttle interval\n\
                    INFOCACHE_EVICTION_MS                 # Eviction window\n\
                    INFOCACHE_EVICTION_OFFSET_MS          # Mark pass offset\n\
                    INFOCACHE_MAX_ENTRIES                 # Hard entry bound\n\
                    RUST_LOG                              # Log filter (default: info)"
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Path to config file (default: <config dir>/infocache/config.toml)
    #[arg(long, global = true, env = "INFOCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Hard bound on resident entries
    #[arg(long, global = true)]
    max_entries: Option<usize>,

    /// Refresh throttle interval in milliseconds
    #[arg(long, global = true)]
    refresh_ms: Option<u64>,

    /// Eviction window in milliseconds
    #[arg(long, global = true)]
    eviction_ms: Option<u64>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable ANSI colors in tables
    #[arg(long, global = true, env = "INFOCACHE_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Cache a directory tree and report cache activity until Ctrl-C
    Watch {
        /// Directory to cache
        dir: PathBuf,
        /// Levels below DIR to cache
        #[arg(long, short = 'd', default_value = "1")]
        depth: usize,
        /// Keep handles alive so entries are never evicted as unreferenced
        #[arg(long)]
        hold: bool,
    },
    /// Cache a directory tree, print statistics and exit
    Scan {
        /// Directory to cache
        dir: PathBuf,
        /// Levels below DIR to cache
        #[arg(long, short = 'd', default_value = "1")]
        depth: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let overrides = ConfigOverrides {
        max_entries: cli.max_entries,
        refresh_ms: cli.refresh_ms,
        eviction_ms: cli.eviction_ms,
    };
    let config = cli::resolve_config(cli.config.as_deref(), &overrides)?;

    let bus = EventBus::new(config.event_capacity);
    let binding = Arc::new(NotifyWatcherBinding::new().with_event_bus(bus.clone()));
    let cache: InfoCache<FileDescriptor> = InfoCache::builder()
        .config(config)
        .watcher(binding)
        .event_bus(bus)
        .build()
        .context("Failed to start cache")?;

    match cli.mode {
        Mode::Watch { dir, depth, hold } => run_watch(&cache, dir, depth, hold, cli.no_color).await,
        Mode::Scan { dir, depth, json } => run_scan(&cache, dir, depth, json, cli.no_color),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_scan(
    cache: &InfoCache<FileDescriptor>,
    dir: PathBuf,
    depth: usize,
    json: bool,
    no_color: bool,
) -> Result<()> {
    let start = Instant::now();
    let paths = cli::collect_paths(&dir, depth)?;
    let report = cli::populate(cache, &paths, false);
    info!(
        cached = report.cached,
        failed = report.failed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Tree cached"
    );

    println!("{}", cli::format_stats(&cache.stats(), json, no_color));
    cache.shutdown();
    Ok(())
}

async fn run_watch(
    cache: &InfoCache<FileDescriptor>,
    dir: PathBuf,
    depth: usize,
    hold: bool,
    no_color: bool,
) -> Result<()> {
    let mut events = cache.subscribe();
    let paths = cli::collect_paths(&dir, depth)?;
    let report = cli::populate(cache, &paths, hold);
    info!(
        cached = report.cached,
        failed = report.failed,
        dir = %dir.display(),
        "Watching tree (Ctrl-C to stop)"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", cli::format_event(&event)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let stats = cache.stats();
    drop(report);
    cache.shutdown();
    println!("{}", cli::format_stats(&stats, false, no_color));
    Ok(())
}
