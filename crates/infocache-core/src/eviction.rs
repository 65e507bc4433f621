//! Grace-window eviction of entries only the cache still references
//!
//! Two periodic tasks share one period (the eviction window):
//! - finalize at `k·window` removes staged ids that were not touched since
//!   staging;
//! - mark at `k·window + offset` stages every resident id whose handle is held
//!   by the cache alone.
//!
//! An entry staged by one mark tick is finalized by the next period's finalize
//! tick unless a `get`/`put`/`refresh` reprieves it in between.

use crate::error::CacheError;
use infocache_types::ResourceId;
use parking_lot::Mutex;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// State scanned by the eviction passes
pub trait EvictionTarget: Send + Sync + 'static {
    /// Stage unreferenced entries; returns how many were newly staged
    fn mark_unreferenced(&self) -> usize;

    /// Remove staged entries that were not reprieved; returns the evicted ids
    fn finalize_candidates(&self) -> Vec<ResourceId>;
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Mark,
    Finalize,
}

/// Owner of the mark/finalize tasks
pub struct EvictionScheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EvictionScheduler {
    /// Spawn both passes on `runtime` against `target`
    pub fn start<T: EvictionTarget>(
        target: Weak<T>,
        window: Duration,
        offset: Duration,
        runtime: &Handle,
    ) -> Result<Self, CacheError> {
        if window.is_zero() || offset >= window {
            return Err(CacheError::invalid_config(format!(
                "eviction offset {offset:?} must be shorter than window {window:?}"
            )));
        }

        let (shutdown_tx, _) = watch::channel(false);

        // interval_at needs the runtime's clock, so build the timers inside it
        let _guard = runtime.enter();
        let start = Instant::now();
        let finalize = runtime.spawn(run_pass(
            Pass::Finalize,
            target.clone(),
            start + window,
            window,
            shutdown_tx.subscribe(),
        ));
        let mark = runtime.spawn(run_pass(
            Pass::Mark,
            target,
            start + offset,
            window,
            shutdown_tx.subscribe(),
        ));

        info!(
            window_ms = window.as_millis() as u64,
            offset_ms = offset.as_millis() as u64,
            "Eviction scheduler started"
        );
        Ok(Self {
            shutdown_tx,
            tasks: Mutex::new(vec![finalize, mark]),
        })
    }

    /// Signal both tasks and abort them. Idempotent.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        debug!("Eviction scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().iter().any(|task| !task.is_finished())
    }
}

impl Drop for EvictionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_pass<T: EvictionTarget>(
    pass: Pass,
    target: Weak<T>,
    first_tick: Instant,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    debug!(?pass, "Eviction target dropped, task exiting");
                    break;
                };
                match pass {
                    Pass::Mark => {
                        target.mark_unreferenced();
                    }
                    Pass::Finalize => {
                        target.finalize_candidates();
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(?pass, "Eviction task shutting down");
                    break;
                }
            }
        }
    }
}
