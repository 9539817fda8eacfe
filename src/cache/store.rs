//! Cache store implementation
//!
//! Typed in-memory store with staleness, idle eviction, in-flight request
//! collapsing and prefix invalidation.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::keys::QueryKey;
use super::CacheConfig;
use crate::types::BackendResult;

/// How a served value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Cached and within the staleness window
    Fresh,
    /// Fetched from the backend by this call
    Fetched,
    /// Cached but stale; the refetch failed
    Stale,
}

/// A value together with its freshness
#[derive(Debug, Clone, PartialEq)]
pub struct Served<V> {
    pub value: V,
    pub freshness: Freshness,
}

impl<V> Served<V> {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    fetched_at: Instant,
    last_access: Instant,
}

impl<V> Entry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            fetched_at: now,
            last_access: now,
        }
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        self.fetched_at.elapsed() >= stale_time
    }

    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_access.elapsed() >= idle_timeout
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Requests served by another caller's in-flight fetch
    pub collapsed: u64,
    pub stale_served: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.collapsed + self.misses;
        if total == 0 {
            0.0
        } else {
            ((self.hits + self.collapsed) as f64 / total as f64) * 100.0
        }
    }

    pub fn add(&mut self, other: &CacheStats) {
        self.entries += other.entries;
        self.hits += other.hits;
        self.misses += other.misses;
        self.collapsed += other.collapsed;
        self.stale_served += other.stale_served;
        self.evictions += other.evictions;
    }
}

/// Cache for one kind of backend read
pub struct QueryStore<V> {
    name: &'static str,
    entries: DashMap<String, Entry<V>>,
    /// Per-key locks held while a fetch is in flight
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    /// Per-key generation, bumped when the key is invalidated
    generations: DashMap<String, u64>,
    next_generation: AtomicU64,
    /// Bumped by `clear`
    epoch: AtomicU64,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    collapsed: AtomicU64,
    stale_served: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone + Send + Sync> QueryStore<V> {
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            generations: DashMap::new(),
            next_generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            collapsed: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fresh cached value, touching its access time
    fn fresh(&self, storage_key: &str) -> Option<V> {
        let mut entry = self.entries.get_mut(storage_key)?;
        if entry.is_idle(self.config.idle_timeout) || entry.is_stale(self.config.stale_time) {
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    /// Cached value regardless of staleness; idle entries are dropped
    fn any(&self, storage_key: &str) -> Option<(V, bool)> {
        {
            let mut entry = self.entries.get_mut(storage_key)?;
            if !entry.is_idle(self.config.idle_timeout) {
                entry.last_access = Instant::now();
                return Some((entry.value.clone(), entry.is_stale(self.config.stale_time)));
            }
        }
        self.entries.remove(storage_key);
        None
    }

    /// Snapshot compared before storing a fetched value
    fn generation(&self, storage_key: &str) -> (u64, u64) {
        let key_generation = self
            .generations
            .get(storage_key)
            .map(|g| *g)
            .unwrap_or(0);
        (self.epoch.load(Ordering::Acquire), key_generation)
    }

    /// Keep an overlapping fetch of `storage_key` from storing its result
    fn bump(&self, storage_key: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.generations.insert(storage_key.to_string(), generation);
    }

    /// Serve from cache, or fetch once for all concurrent callers of `key`.
    ///
    /// When the fetch fails and a stale value exists, the stale value is
    /// served instead of the error.
    pub async fn get_or_fetch<F, Fut>(&self, key: &QueryKey, fetch: F) -> BackendResult<Served<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BackendResult<V>>,
    {
        let storage_key = key.to_storage_key();

        if let Some(value) = self.fresh(&storage_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(store = self.name, key = %storage_key, "Cache hit");
            return Ok(Served {
                value,
                freshness: Freshness::Fresh,
            });
        }

        let lock = self
            .in_flight
            .entry(storage_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // Another caller may have filled the entry while we waited
        if let Some(value) = self.fresh(&storage_key) {
            self.collapsed.fetch_add(1, Ordering::Relaxed);
            debug!(store = self.name, key = %storage_key, "Collapsed into in-flight fetch");
            drop(guard);
            self.release(&storage_key, lock);
            return Ok(Served {
                value,
                freshness: Freshness::Fresh,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(store = self.name, key = %storage_key, "Cache miss");

        let generation = self.generation(&storage_key);
        let result = fetch().await;

        let served = match result {
            Ok(value) => {
                if self.generation(&storage_key) == generation {
                    self.entries
                        .insert(storage_key.clone(), Entry::new(value.clone()));
                    self.maybe_evict();
                } else {
                    debug!(
                        store = self.name,
                        key = %storage_key,
                        "Invalidated during fetch, result not cached"
                    );
                }
                Ok(Served {
                    value,
                    freshness: Freshness::Fetched,
                })
            }
            Err(e) => match self.any(&storage_key) {
                Some((value, _)) => {
                    self.stale_served.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        store = self.name,
                        key = %storage_key,
                        error = %e,
                        "Refetch failed, serving stale value"
                    );
                    Ok(Served {
                        value,
                        freshness: Freshness::Stale,
                    })
                }
                None => Err(e),
            },
        };

        drop(guard);
        self.release(&storage_key, lock);
        served
    }

    /// Drop the in-flight lock once no other caller holds it
    fn release(&self, storage_key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.in_flight
            .remove_if(storage_key, |_, l| Arc::strong_count(l) == 1);
    }

    /// Cached value without fetching
    pub fn peek(&self, key: &QueryKey) -> Option<Served<V>> {
        self.any(&key.to_storage_key()).map(|(value, stale)| Served {
            value,
            freshness: if stale {
                Freshness::Stale
            } else {
                Freshness::Fresh
            },
        })
    }

    pub fn insert(&self, key: &QueryKey, value: V) {
        self.entries.insert(key.to_storage_key(), Entry::new(value));
        self.maybe_evict();
    }

    /// Remove an entry; an overlapping fetch will not repopulate it
    pub fn remove(&self, key: &QueryKey) -> Option<V> {
        let storage_key = key.to_storage_key();
        self.bump(&storage_key);
        self.entries
            .remove(&storage_key)
            .map(|(_, entry)| entry.value)
    }

    /// Invalidate entries matching a pattern (prefix match), including fetches in flight
    pub fn invalidate_prefix(&self, pattern: &str) -> usize {
        let fetching: Vec<String> = self
            .in_flight
            .iter()
            .filter(|lock| lock.key().starts_with(pattern))
            .map(|lock| lock.key().clone())
            .collect();
        for key in &fetching {
            self.bump(key);
        }

        let keys_to_remove: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(pattern))
            .map(|entry| entry.key().clone())
            .collect();

        let count = keys_to_remove.len();
        for key in keys_to_remove {
            self.bump(&key);
            self.entries.remove(&key);
        }

        if count > 0 {
            debug!(store = self.name, pattern = pattern, count = count, "Invalidated cache entries");
        }
        count
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Remove idle entries
    pub fn cleanup(&self) -> usize {
        let idle: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_idle(self.config.idle_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let count = idle.len();
        for key in idle {
            self.entries.remove(&key);
        }

        // Locks left behind by abandoned fetches
        self.in_flight.retain(|_, lock| Arc::strong_count(lock) > 1);
        // Generations only matter while a fetch of the key is in flight
        self.generations
            .retain(|key, _| self.in_flight.contains_key(key));

        if count > 0 {
            debug!(store = self.name, count = count, "Cleaned up idle cache entries");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            collapsed: self.collapsed.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict entries if over capacity (least recently accessed first)
    fn maybe_evict(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        // Evict a little extra to avoid thrashing
        let headroom = (self.config.max_entries / 10).min(100);
        let to_evict = self.entries.len() - self.config.max_entries + headroom;

        let mut entries: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_access))
            .collect();

        entries.sort_by_key(|(_, accessed)| *accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(store = self.name, evicted = to_evict, "Evicted cache entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendError, Subject};
    use std::sync::atomic::AtomicU32;

    const WALLET: &str = "0x00000000000000000000000000000000000000aa";

    fn store(config: CacheConfig) -> QueryStore<u64> {
        QueryStore::new("counts", config)
    }

    fn count_key() -> QueryKey {
        QueryKey::count(&Subject::wallet(WALLET))
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_fetch() {
        let store = store(CacheConfig::default());
        let calls = &AtomicU32::new(0);

        for _ in 0..3 {
            let served = store
                .get_or_fetch(&count_key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(4)
                })
                .await
                .unwrap();
            assert_eq!(served.value, 4);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_stale_entry_refetched() {
        let store = store(CacheConfig {
            stale_time: Duration::ZERO,
            ..Default::default()
        });
        store.insert(&count_key(), 1);

        let served = store
            .get_or_fetch(&count_key(), || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(served.value, 2);
        assert_eq!(served.freshness, Freshness::Fetched);
    }

    #[tokio::test]
    async fn test_failed_refetch_serves_stale() {
        let store = store(CacheConfig {
            stale_time: Duration::ZERO,
            ..Default::default()
        });
        store.insert(&count_key(), 5);

        let served = store
            .get_or_fetch(&count_key(), || async {
                Err(BackendError::Network("down".into()))
            })
            .await
            .unwrap();
        assert_eq!(served.value, 5);
        assert!(served.is_stale());
        assert_eq!(store.stats().stale_served, 1);
    }

    #[tokio::test]
    async fn test_failure_without_cached_value_surfaces() {
        let store = store(CacheConfig::default());
        let result = store
            .get_or_fetch(&count_key(), || async {
                Err(BackendError::Timeout("/count".into()))
            })
            .await;
        assert!(matches!(result, Err(BackendError::Timeout(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_collapse() {
        let store = Arc::new(store(CacheConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    store
                        .get_or_fetch(&count_key(), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(9)
                        })
                        .await
                        .map(|s| s.value)
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().collapsed, 7);
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_not_cached() {
        let store = Arc::new(store(CacheConfig::default()));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let fetching = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .get_or_fetch(&count_key(), || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(3)
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        store.remove(&count_key());
        release_tx.send(()).unwrap();

        let served = fetching.await.unwrap().unwrap();
        assert_eq!(served.value, 3);
        assert!(store.peek(&count_key()).is_none());
    }

    #[tokio::test]
    async fn test_invalidating_one_key_leaves_other_fetches_cached() {
        let store = Arc::new(store(CacheConfig::default()));
        let other = QueryKey::count(&Subject::wallet("0x00000000000000000000000000000000000000bb"));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let fetching = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .get_or_fetch(&count_key(), || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(3)
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        store.remove(&other);
        release_tx.send(()).unwrap();

        fetching.await.unwrap().unwrap();
        assert_eq!(store.peek(&count_key()).map(|s| s.value), Some(3));
    }

    #[tokio::test]
    async fn test_prefix_invalidation_reaches_fetch_in_flight() {
        let store = Arc::new(QueryStore::<u64>::new("keys", CacheConfig::default()));
        let subject = Subject::wallet(WALLET);
        let key = QueryKey::key_at(&subject, 0);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let fetching = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .get_or_fetch(&key, || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(store.invalidate_prefix(&QueryKey::key_list_pattern(&subject)), 0);
        release_tx.send(()).unwrap();

        fetching.await.unwrap().unwrap();
        assert!(store.peek(&key).is_none());
        store.cleanup();
        assert!(store.generations.is_empty());
    }

    #[tokio::test]
    async fn test_idle_entries_cleaned_up() {
        let store = store(CacheConfig {
            idle_timeout: Duration::ZERO,
            ..Default::default()
        });
        store.insert(&count_key(), 1);
        assert_eq!(store.cleanup(), 1);
        assert!(store.peek(&count_key()).is_none());
    }

    #[test]
    fn test_prefix_invalidation() {
        let store: QueryStore<u64> = QueryStore::new("keys", CacheConfig::default());
        let subject = Subject::wallet(WALLET);
        for i in 0..3 {
            store.insert(&QueryKey::key_at(&subject, i), i);
        }
        store.insert(&count_key(), 3);

        assert_eq!(store.invalidate_prefix(&QueryKey::key_list_pattern(&subject)), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_capacity_eviction() {
        let store = store(CacheConfig {
            max_entries: 10,
            ..Default::default()
        });
        for i in 0..11 {
            store.insert(&QueryKey::key_at(&Subject::wallet(WALLET), i), i);
        }
        let stats = store.stats();
        assert_eq!(stats.entries, 9);
        assert_eq!(stats.evictions, 2);
    }
}
