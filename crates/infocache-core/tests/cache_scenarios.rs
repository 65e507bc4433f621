//! End-to-end cache behavior through the public `InfoCache` API

use infocache_core::{
    CacheConfig, CacheEvent, ChangeKind, Descriptor, EvictionReason, InfoCache,
    ManualWatcherBinding, ResourceId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CountingDescriptor {
    refreshes: AtomicUsize,
}

impl CountingDescriptor {
    fn count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Descriptor for CountingDescriptor {
    fn refresh(&self) -> anyhow::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn id(raw: &str) -> ResourceId {
    ResourceId::new(raw)
}

fn watched_cache(
    config: CacheConfig,
) -> (InfoCache<CountingDescriptor>, Arc<ManualWatcherBinding>) {
    let binding = Arc::new(ManualWatcherBinding::new());
    let cache = InfoCache::builder()
        .config(config)
        .watcher(binding.clone())
        .build()
        .unwrap();
    (cache, binding)
}

#[tokio::test]
async fn test_size_bound_keeps_most_recent() {
    let config = CacheConfig::default().with_max_entries(2);
    let cache = InfoCache::<CountingDescriptor>::new(config).unwrap();

    cache.put(id("a"), Arc::new(CountingDescriptor::default()));
    cache.put(id("b"), Arc::new(CountingDescriptor::default()));
    cache.put(id("c"), Arc::new(CountingDescriptor::default()));

    assert!(cache.get(&id("a")).is_none());
    assert!(cache.get(&id("b")).is_some());
    assert!(cache.get(&id("c")).is_some());
    assert_eq!(cache.stats().resident, 2);
}

#[tokio::test]
async fn test_handle_identity_until_removed() {
    let cache = InfoCache::<CountingDescriptor>::new(CacheConfig::default()).unwrap();
    let handle = Arc::new(CountingDescriptor::default());
    cache.put(id("/x/file"), Arc::clone(&handle));

    for _ in 0..3 {
        assert!(Arc::ptr_eq(&cache.get(&id("/x/file")).unwrap(), &handle));
    }

    let removed = cache.remove(&id("/x/file")).unwrap();
    assert!(Arc::ptr_eq(&removed, &handle));
    assert!(cache.get(&id("/x/file")).is_none());
}

#[tokio::test]
async fn test_throttled_refresh_runs_once_per_interval() {
    let config = CacheConfig::default().with_refresh_interval(Duration::from_millis(500));
    let cache = InfoCache::<CountingDescriptor>::new(config).unwrap();
    let handle = Arc::new(CountingDescriptor::default());
    let x = id("x");
    cache.put(x.clone(), Arc::clone(&handle));

    // Wait out the insertion stamp so the first request runs synchronously
    std::thread::sleep(Duration::from_millis(520));
    let start = Instant::now();
    cache.request_refresh(&x);
    assert_eq!(handle.count(), 1);

    std::thread::sleep(Duration::from_millis(100));
    cache.request_refresh(&x);
    assert_eq!(handle.count(), 1);

    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.count() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(handle.count(), 2);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn test_scope_refcount_unsubscribes_at_zero() {
    let (cache, binding) = watched_cache(CacheConfig::default());
    let scope = id("/docs");

    cache.put(id("/docs/a"), Arc::new(CountingDescriptor::default()));
    cache.put(id("/docs/b"), Arc::new(CountingDescriptor::default()));
    assert_eq!(cache.store().scope_refcount(&scope), 2);

    cache.remove(&id("/docs/a"));
    assert_eq!(cache.store().scope_refcount(&scope), 1);
    assert!(binding.is_watching(&scope));

    cache.remove(&id("/docs/b"));
    assert!(!binding.is_watching(&scope));
    assert_eq!(binding.unsubscribe_calls(), 1);
}

#[tokio::test]
async fn test_change_signal_reaches_descriptor() {
    let config = CacheConfig::default().with_refresh_interval(Duration::from_millis(30));
    let (cache, binding) = watched_cache(config);
    let handle = Arc::new(CountingDescriptor::default());
    let file = id("/docs/report.txt");
    cache.put(file.clone(), Arc::clone(&handle));
    let mut events = cache.subscribe();

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(binding.emit_for(&file, ChangeKind::AttributeChanged), 1);
    assert_eq!(handle.count(), 1);
    assert_eq!(events.try_recv().unwrap(), CacheEvent::Refreshed(file));
}

#[tokio::test]
async fn test_refresh_absent_id_is_noop() {
    let cache = InfoCache::<CountingDescriptor>::new(CacheConfig::default()).unwrap();
    assert!(!cache.refresh(&id("/never/cached")).unwrap());
    assert_eq!(cache.stats().pending_refreshes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_touched_entry_survives_one_finalize() {
    let config = CacheConfig::default()
        .with_eviction_window(Duration::from_secs(10))
        .with_eviction_offset(Duration::from_secs(1));
    let cache = InfoCache::<CountingDescriptor>::new(config).unwrap();
    let mut events = cache.subscribe();
    let a = id("/tmp/a");
    cache.put(a.clone(), Arc::new(CountingDescriptor::default()));

    // t=1s mark stages `a`
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(cache.store().is_eviction_candidate(&a));

    drop(cache.get(&a));

    // t=10s finalize reprieves, t=11s mark stages again
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(cache.store().is_eviction_candidate(&a));
    assert!(cache.get(&a).is_some());

    // Still reprieved by the get above; the cycle after that evicts
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(cache.get(&a).is_none());
    assert_eq!(
        events.try_recv().unwrap(),
        CacheEvent::Evicted {
            id: a,
            reason: EvictionReason::Unreferenced
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_externally_held_entry_is_never_staged() {
    let config = CacheConfig::default()
        .with_eviction_window(Duration::from_secs(10))
        .with_eviction_offset(Duration::from_secs(1));
    let cache = InfoCache::<CountingDescriptor>::new(config).unwrap();
    let held = Arc::new(CountingDescriptor::default());
    cache.put(id("/held"), Arc::clone(&held));

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(cache.get(&id("/held")).is_some());
    assert!(!cache.store().is_eviction_candidate(&id("/held")));
}

#[tokio::test]
async fn test_disabled_schemes_reported_in_stats() {
    let cache = InfoCache::<CountingDescriptor>::new(CacheConfig::default()).unwrap();
    cache.set_cache_disabled("trash", true);
    cache.set_cache_disabled("burn", true);
    cache.set_cache_disabled("burn", false);

    assert!(cache.is_cache_disabled("trash"));
    assert!(!cache.is_cache_disabled("burn"));
    assert_eq!(cache.stats().disabled_schemes, vec!["trash".to_string()]);
}

#[tokio::test]
async fn test_shutdown_then_drop() {
    let (cache, binding) = watched_cache(CacheConfig::default());
    cache.put(id("/a/1"), Arc::new(CountingDescriptor::default()));
    cache.put(id("/b/1"), Arc::new(CountingDescriptor::default()));

    cache.shutdown();
    assert_eq!(binding.watched_scopes(), 0);
    drop(cache);
    assert_eq!(binding.unsubscribe_calls(), 2);
}
