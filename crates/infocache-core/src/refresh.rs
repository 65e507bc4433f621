//! Throttled refresh coordination
//!
//! Refresh requests for one id are coalesced so that at most one effective
//! refresh runs per throttle interval:
//!
//! - a request arriving after the interval has elapsed runs synchronously on
//!   the caller's thread;
//! - a request arriving inside the interval is parked in the pending set and
//!   executed later by the `infocache-refresh` worker thread.
//!
//! Deferred requests are never dropped; they are delayed by at most one
//! interval. The worker sleeps on a condvar for at most one interval and is
//! woken early by new deferrals and by `stop()`.

use crate::error::CacheError;
use infocache_types::ResourceId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Something that can re-populate a cached entry
pub trait RefreshTarget: Send + Sync + 'static {
    /// Refresh `id` in place.
    ///
    /// `Ok(false)` means the id is no longer resident (a stale request).
    fn refresh_entry(&self, id: &ResourceId) -> Result<bool, CacheError>;
}

#[derive(Debug, Default)]
struct RefreshState {
    /// Time of the last effective refresh (or insertion) per id
    last_refresh: HashMap<ResourceId, Instant>,
    /// Deferred requests with the refresh time they were throttled against
    pending: HashMap<ResourceId, Instant>,
    /// Pending ids whose entry disappeared from the store
    cancelled: HashSet<ResourceId>,
    stopped: bool,
}

impl RefreshState {
    /// Remove and return every pending id whose interval has elapsed,
    /// dropping cancelled ones. Due ids are stamped with `now`.
    fn take_due(&mut self, interval: Duration, now: Instant) -> Vec<ResourceId> {
        let RefreshState {
            last_refresh,
            pending,
            cancelled,
            ..
        } = self;
        let cancelled = std::mem::take(cancelled);
        let mut due = Vec::new();

        pending.retain(|id, throttled_at| {
            if cancelled.contains(id) {
                trace!(%id, "Dropping cancelled refresh");
                return false;
            }
            let last = last_refresh.get(id).copied().unwrap_or(*throttled_at);
            if now.saturating_duration_since(last) >= interval {
                due.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &due {
            last_refresh.insert(id.clone(), now);
        }
        due
    }

    /// How long the worker may sleep before the next pending id becomes due
    fn next_wait(&self, interval: Duration, now: Instant) -> Duration {
        self.pending
            .iter()
            .map(|(id, throttled_at)| {
                let last = self.last_refresh.get(id).copied().unwrap_or(*throttled_at);
                (last + interval).saturating_duration_since(now)
            })
            .min()
            .unwrap_or(interval)
            .min(interval)
    }
}

struct Shared {
    interval: Duration,
    state: Mutex<RefreshState>,
    wake: Condvar,
}

/// Background worker plus throttle bookkeeping
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshCoordinator {
    /// Create a coordinator without starting its worker
    pub fn new(interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                interval,
                state: Mutex::new(RefreshState::default()),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread executing deferred refreshes against `target`.
    ///
    /// The worker exits when `stop()` is called or `target` is dropped.
    pub fn spawn<T: RefreshTarget>(&self, target: Weak<T>) -> Result<(), CacheError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("Refresh worker already running");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("infocache-refresh".to_string())
            .spawn(move || worker_loop(shared, target))
            .map_err(|source| CacheError::WorkerSpawn { source })?;

        *worker = Some(handle);
        Ok(())
    }

    /// Request a refresh of `id`, executing it now if the throttle allows.
    pub fn request_refresh<T: RefreshTarget + ?Sized>(&self, target: &T, id: &ResourceId) {
        let now = Instant::now();
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                trace!(%id, "Refresh requested after stop, ignoring");
                return;
            }

            if let Some(last) = state.last_refresh.get(id).copied() {
                if now.saturating_duration_since(last) < self.shared.interval {
                    state.cancelled.remove(id);
                    state.pending.insert(id.clone(), last);
                    drop(state);
                    self.shared.wake.notify_one();
                    trace!(%id, "Refresh throttled, deferred to worker");
                    return;
                }
            }

            state.last_refresh.insert(id.clone(), now);
            state.pending.remove(id);
        }

        match target.refresh_entry(id) {
            Ok(true) => trace!(%id, "Refreshed synchronously"),
            Ok(false) => trace!(%id, "Refresh for non-resident id, bookkeeping cleared"),
            Err(e) => {
                warn!(%id, error = %e, "Refresh failed, retrying next interval");
                self.requeue(id, now);
            }
        }
    }

    /// Stamp a fresh refresh time for `id` (called when an entry is inserted)
    pub fn record(&self, id: &ResourceId) {
        let mut state = self.shared.state.lock();
        state.last_refresh.insert(id.clone(), Instant::now());
        state.cancelled.remove(id);
    }

    /// Drop throttle bookkeeping for an id that left the store
    pub fn forget(&self, id: &ResourceId) {
        let mut state = self.shared.state.lock();
        state.last_refresh.remove(id);
        if state.pending.contains_key(id) {
            state.cancelled.insert(id.clone());
        }
    }

    /// Number of deferred refreshes not yet executed or cancelled
    pub fn pending_len(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .pending
            .keys()
            .filter(|id| !state.cancelled.contains(*id))
            .count()
    }

    pub fn is_pending(&self, id: &ResourceId) -> bool {
        let state = self.shared.state.lock();
        state.pending.contains_key(id) && !state.cancelled.contains(id)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    ///
    /// No refresh executes after this returns.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.stopped {
                state.stopped = true;
                debug!(pending = state.pending.len(), "Stopping refresh worker");
            }
            state.pending.clear();
            state.cancelled.clear();
        }
        self.shared.wake.notify_all();

        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Last owner dropped on the worker itself; the loop exits on its own.
            return;
        }
        if handle.join().is_err() {
            warn!("Refresh worker panicked");
        }
    }

    /// Re-queue a failed refresh; the attempt time throttles the retry
    fn requeue(&self, id: &ResourceId, attempted_at: Instant) {
        let mut state = self.shared.state.lock();
        if state.stopped || !state.last_refresh.contains_key(id) {
            return;
        }
        state.last_refresh.insert(id.clone(), attempted_at);
        state.pending.insert(id.clone(), attempted_at);
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<T: RefreshTarget>(shared: Arc<Shared>, target: Weak<T>) {
    info!(interval_ms = shared.interval.as_millis() as u64, "Refresh worker started");

    loop {
        let due = {
            let mut state = shared.state.lock();
            if state.stopped {
                break;
            }
            state.take_due(shared.interval, Instant::now())
        };

        if !due.is_empty() {
            let Some(target) = target.upgrade() else {
                break;
            };
            debug!(count = due.len(), "Executing deferred refreshes");

            for id in due {
                if shared.state.lock().stopped {
                    break;
                }
                let attempted_at = Instant::now();
                if let Err(e) = target.refresh_entry(&id) {
                    warn!(%id, error = %e, "Deferred refresh failed, retrying next interval");
                    let mut state = shared.state.lock();
                    if !state.stopped && state.last_refresh.contains_key(&id) {
                        state.last_refresh.insert(id.clone(), attempted_at);
                        state.pending.insert(id, attempted_at);
                    }
                }
            }
        }

        let mut state = shared.state.lock();
        if state.stopped || target.strong_count() == 0 {
            break;
        }
        let wait = state.next_wait(shared.interval, Instant::now());
        if !wait.is_zero() {
            shared.wake.wait_for(&mut state, wait);
        }
    }

    info!("Refresh worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        refreshes: AtomicUsize,
        failing: AtomicBool,
        absent: AtomicBool,
    }

    impl CountingTarget {
        fn count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    impl RefreshTarget for CountingTarget {
        fn refresh_entry(&self, id: &ResourceId) -> Result<bool, CacheError> {
            if self.absent.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::Refresh {
                    id: id.clone(),
                    message: "device busy".to_string(),
                });
            }
            Ok(true)
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_throttle_without_worker() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(200));
        let target = CountingTarget::default();
        let id = ResourceId::new("/x");

        coordinator.request_refresh(&target, &id);
        assert_eq!(target.count(), 1);

        coordinator.request_refresh(&target, &id);
        assert_eq!(target.count(), 1, "second request inside the interval is deferred");
        assert!(coordinator.is_pending(&id));

        thread::sleep(Duration::from_millis(250));
        coordinator.request_refresh(&target, &id);
        assert_eq!(target.count(), 2);
        assert!(!coordinator.is_pending(&id));
    }

    #[test]
    fn test_deferred_refresh_runs_on_worker() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(500));
        let target = Arc::new(CountingTarget::default());
        coordinator.spawn(Arc::downgrade(&target)).unwrap();
        let id = ResourceId::new("x");

        let start = Instant::now();
        coordinator.request_refresh(target.as_ref(), &id);
        assert_eq!(target.count(), 1);

        thread::sleep(Duration::from_millis(100));
        coordinator.request_refresh(target.as_ref(), &id);
        assert_eq!(target.count(), 1);

        assert!(wait_until(Duration::from_secs(2), || target.count() == 2));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "ran too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(900), "ran too late: {elapsed:?}");
        assert_eq!(coordinator.pending_len(), 0);

        coordinator.stop();
    }

    #[test]
    fn test_record_throttles_fresh_entries() {
        let coordinator = RefreshCoordinator::new(Duration::from_secs(5));
        let target = CountingTarget::default();
        let id = ResourceId::new("/fresh");

        coordinator.record(&id);
        coordinator.request_refresh(&target, &id);
        assert_eq!(target.count(), 0);
        assert_eq!(coordinator.pending_len(), 1);
    }

    #[test]
    fn test_forget_cancels_pending() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(50));
        let target = Arc::new(CountingTarget::default());
        let id = ResourceId::new("/gone");

        coordinator.record(&id);
        coordinator.request_refresh(target.as_ref(), &id);
        assert!(coordinator.is_pending(&id));

        coordinator.forget(&id);
        assert!(!coordinator.is_pending(&id));

        coordinator.spawn(Arc::downgrade(&target)).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(target.count(), 0);
        coordinator.stop();
    }

    #[test]
    fn test_failed_refresh_is_retried() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(50));
        let target = Arc::new(CountingTarget::default());
        target.failing.store(true, Ordering::SeqCst);
        coordinator.spawn(Arc::downgrade(&target)).unwrap();
        let id = ResourceId::new("/flaky");

        coordinator.request_refresh(target.as_ref(), &id);
        assert_eq!(target.count(), 1);
        assert!(coordinator.is_pending(&id));

        // Worker keeps retrying instead of dying
        assert!(wait_until(Duration::from_secs(2), || target.count() >= 3));

        target.failing.store(false, Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(2), || !coordinator.is_pending(&id)));
        coordinator.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(500));
        let target = Arc::new(CountingTarget::default());
        coordinator.spawn(Arc::downgrade(&target)).unwrap();
        assert!(coordinator.is_running());

        let id = ResourceId::new("/late");
        coordinator.request_refresh(target.as_ref(), &id);
        coordinator.request_refresh(target.as_ref(), &id);

        let start = Instant::now();
        coordinator.stop();
        assert!(start.elapsed() < Duration::from_millis(500));
        coordinator.stop();
        assert!(!coordinator.is_running());

        coordinator.request_refresh(target.as_ref(), &ResourceId::new("/other"));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(target.count(), 1);
    }

    #[test]
    fn test_worker_exits_when_target_dropped() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(20));
        let target = Arc::new(CountingTarget::default());
        coordinator.spawn(Arc::downgrade(&target)).unwrap();
        drop(target);

        let handle = coordinator.worker.lock().take().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished());
    }

    #[test]
    fn test_absent_target_is_not_requeued() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(50));
        let target = CountingTarget::default();
        target.absent.store(true, Ordering::SeqCst);

        coordinator.request_refresh(&target, &ResourceId::new("/nope"));
        assert_eq!(coordinator.pending_len(), 0);
    }
}
