//! Two-tier cache manager
//!
//! Composes a memory tier over a disk tier. Operations on one key are
//! serialized by a per-key async lock; disjoint keys proceed in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::{CacheKey, CacheRecord, CacheTier, DiskTier, MemoryTier};
use crate::core::config::ProjectConfig;
use crate::core::{CoreError, CoreResult};

/// Cache construction options
#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub enabled: bool,
    pub memory_capacity: usize,
    pub memory_ttl: Duration,
    /// Default TTL for `set` calls without one; `None` never expires
    pub disk_ttl: Option<Duration>,
    pub root: PathBuf,
}

impl CacheOptions {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            enabled: config.cache.enabled,
            memory_capacity: config.cache.memory_capacity,
            memory_ttl: config.cache.memory_ttl(),
            disk_ttl: config.cache.disk_ttl(),
            root: config.cache_dir(),
        }
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Corrupt entries detected and removed
    pub healed: u64,
    pub memory_entries: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// Output of a [`TwoTierCache::get_or_compute`] closure
#[derive(Debug)]
pub struct Computed<T> {
    pub value: T,
    /// Whether the value may be stored; degraded results should not be
    pub cacheable: bool,
}

impl<T> Computed<T> {
    pub fn cacheable(value: T) -> Self {
        Self {
            value,
            cacheable: true,
        }
    }

    pub fn uncacheable(value: T) -> Self {
        Self {
            value,
            cacheable: false,
        }
    }
}

/// A value returned by [`TwoTierCache::get_or_compute`]
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub from_cache: bool,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    healed: AtomicU64,
}

type KeyLocks = Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>;

fn lock_map(locks: &KeyLocks) -> MutexGuard<'_, HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>> {
    locks.lock().unwrap_or_else(|e| e.into_inner())
}

/// Holds one key's lock; drops the map slot when no one else wants it
struct KeyLock<'a> {
    locks: &'a KeyLocks,
    key: CacheKey,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = lock_map(self.locks);
        // The map and this handle are the only holders left
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Memory tier over disk tier with per-key serialization
pub struct TwoTierCache {
    enabled: bool,
    memory: Arc<dyn CacheTier>,
    disk: Arc<dyn CacheTier>,
    default_ttl: Option<Duration>,
    locks: KeyLocks,
    counters: Counters,
    /// Bumped by every invalidation; a computation that overlaps one does
    /// not store its result
    generation: AtomicU64,
}

impl TwoTierCache {
    /// Builds the standard memory + disk composition
    pub fn new(options: CacheOptions) -> CoreResult<Self> {
        if !options.enabled {
            return Ok(Self::disabled());
        }
        let memory = MemoryTier::new(options.memory_capacity, Some(options.memory_ttl));
        let disk = DiskTier::new(options.root)?;
        Ok(Self::with_tiers(
            Arc::new(memory),
            Arc::new(disk),
            options.disk_ttl,
        ))
    }

    /// Composes arbitrary tiers
    pub fn with_tiers(
        memory: Arc<dyn CacheTier>,
        disk: Arc<dyn CacheTier>,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            enabled: true,
            memory,
            disk,
            default_ttl,
            locks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything and never touches disk
    pub fn disabled() -> Self {
        let mut cache = Self::with_tiers(
            Arc::new(MemoryTier::new(1, None)),
            Arc::new(MemoryTier::new(1, None)),
            None,
        );
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn lock_key(&self, key: &CacheKey) -> KeyLock<'_> {
        let mutex = lock_map(&self.locks).entry(key.clone()).or_default().clone();
        let guard = mutex.clone().lock_owned().await;
        KeyLock {
            locks: &self.locks,
            key: key.clone(),
            mutex,
            guard: Some(guard),
        }
    }

    /// Runs a blocking operation against the disk tier
    async fn on_disk<R, F>(&self, op: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&dyn CacheTier) -> CoreResult<R> + Send + 'static,
    {
        let disk = Arc::clone(&self.disk);
        tokio::task::spawn_blocking(move || op(disk.as_ref()))
            .await
            .map_err(|e| CoreError::Internal(format!("Disk cache task failed: {e}")))?
    }

    fn memory_lookup(&self, key: &CacheKey) -> Option<serde_json::Value> {
        match self.memory.get(key) {
            Ok(Some(record)) => {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit (memory)");
                Some(record.value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, "Memory tier lookup failed: {}", e);
                None
            }
        }
    }

    /// Disk lookup with promotion; caller holds the key lock
    async fn disk_lookup(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let owned = key.clone();
        match self.on_disk(move |disk| disk.get(&owned)).await {
            Ok(Some(record)) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit (disk)");
                let value = record.value.clone();
                if let Err(e) = self.memory.set(record) {
                    warn!(key = %key, "Failed to promote cache entry: {}", e);
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, "Disk tier lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn lookup_locked(&self, key: &CacheKey) -> Option<serde_json::Value> {
        if let Some(value) = self.memory_lookup(key) {
            return Some(value);
        }
        self.disk_lookup(key).await
    }

    async fn store_locked(&self, key: &CacheKey, value: serde_json::Value, ttl: Option<Duration>) {
        let record = CacheRecord::new(key.clone(), value, ttl.or(self.default_ttl));

        let disk_record = record.clone();
        if let Err(e) = self.on_disk(move |disk| disk.set(disk_record)).await {
            warn!(key = %key, "Failed to persist cache entry: {}", e);
        }
        if let Err(e) = self.memory.set(record) {
            warn!(key = %key, "Failed to store cache entry in memory: {}", e);
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn decode<T: DeserializeOwned>(&self, key: &CacheKey, value: serde_json::Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(
                    key = %key,
                    "{}",
                    CoreError::CacheCorruption(format!("payload does not decode: {e}"))
                );
                self.counters.healed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Raw lookup: memory first, then disk (promoting into memory)
    pub async fn get_value(&self, key: &CacheKey) -> Option<serde_json::Value> {
        if !self.enabled {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if let Some(value) = self.memory_lookup(key) {
            return Some(value);
        }

        let _lock = self.lock_key(key).await;
        let found = self.lookup_locked(key).await;
        if found.is_none() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
        }
        found
    }

    /// Typed lookup; a payload that no longer decodes is dropped as corrupt
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get_value(key).await?;
        let decoded = self.decode(key, value);
        if decoded.is_none() {
            self.invalidate(key).await;
        }
        decoded
    }

    /// Stores a value in both tiers. `ttl = None` uses the default TTL.
    ///
    /// Only serialization errors are returned; tier failures degrade to a
    /// logged warning.
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> CoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let value = serde_json::to_value(value)?;
        let _lock = self.lock_key(key).await;
        self.store_locked(key, value, ttl).await;
        Ok(())
    }

    /// Returns the cached value, or computes and stores it.
    ///
    /// Concurrent callers for one key wait for the first; when its result
    /// was stored they observe it instead of computing again. A result whose
    /// computation overlapped an invalidation is returned but not stored, so
    /// callers that waited on it compute afresh.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> CoreResult<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<Computed<T>>>,
    {
        if !self.enabled {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let computed = compute().await?;
            return Ok(Fetched {
                value: computed.value,
                from_cache: false,
            });
        }

        if let Some(value) = self.memory_lookup(key) {
            if let Some(decoded) = self.decode(key, value) {
                return Ok(Fetched {
                    value: decoded,
                    from_cache: true,
                });
            }
        }

        let _lock = self.lock_key(key).await;
        if let Some(value) = self.lookup_locked(key).await {
            if let Some(decoded) = self.decode(key, value) {
                return Ok(Fetched {
                    value: decoded,
                    from_cache: true,
                });
            }
            self.remove_locked(key).await;
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss, computing");
        let started = self.generation();
        let computed = compute().await?;
        if !computed.cacheable {
            debug!(key = %key, "Result not cacheable, skipping store");
        } else if self.generation() != started {
            debug!(key = %key, "Invalidated during compute, skipping store");
        } else {
            let value = serde_json::to_value(&computed.value)?;
            self.store_locked(key, value, ttl).await;
            // An invalidation that raced the write must still win
            if self.generation() != started {
                self.remove_locked(key).await;
            }
        }

        Ok(Fetched {
            value: computed.value,
            from_cache: false,
        })
    }

    async fn remove_locked(&self, key: &CacheKey) {
        if let Err(e) = self.memory.remove(key) {
            warn!(key = %key, "Failed to remove memory entry: {}", e);
        }
        let owned = key.clone();
        if let Err(e) = self.on_disk(move |disk| disk.remove(&owned)).await {
            warn!(key = %key, "Failed to remove disk entry: {}", e);
        }
    }

    /// Removes exactly one key from both tiers
    pub async fn invalidate(&self, key: &CacheKey) {
        if !self.enabled {
            return;
        }
        self.bump_generation();
        let _lock = self.lock_key(key).await;
        self.remove_locked(key).await;
    }

    /// Removes every key starting with `prefix` from both tiers
    pub async fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        if !self.enabled {
            return 0;
        }
        self.bump_generation();
        let from_memory = self.memory.remove_prefix(prefix).unwrap_or_else(|e| {
            warn!(prefix = %prefix, "Failed to invalidate memory entries: {}", e);
            0
        });
        let owned = prefix.clone();
        let from_disk = match self.on_disk(move |disk| disk.remove_prefix(&owned)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(prefix = %prefix, "Failed to invalidate disk entries: {}", e);
                0
            }
        };
        debug!(prefix = %prefix, from_memory, from_disk, "Invalidated cache prefix");
        from_memory.max(from_disk)
    }

    /// Empties both tiers
    pub async fn clear(&self) -> CoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.bump_generation();
        self.memory.clear()?;
        self.on_disk(|disk| disk.clear()).await
    }

    /// Drops expired entries from both tiers; returns the disk count removed
    pub async fn sweep_expired(&self) -> CoreResult<usize> {
        if !self.enabled {
            return Ok(0);
        }
        self.memory.sweep_expired()?;
        self.on_disk(|disk| disk.sweep_expired()).await
    }

    pub fn stats(&self) -> CacheStats {
        let memory = self.memory.counters();
        let disk = self.disk.counters();
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.counters.disk_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = memory_hits + disk_hits + misses;

        CacheStats {
            memory_hits,
            disk_hits,
            misses,
            evictions: memory.evictions + disk.evictions,
            healed: self.counters.healed.load(Ordering::Relaxed) + memory.healed + disk.healed,
            memory_entries: self.memory.len(),
            hit_rate: if total > 0 {
                (memory_hits + disk_hits) as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> CacheOptions {
        CacheOptions {
            enabled: true,
            memory_capacity: 16,
            memory_ttl: Duration::from_secs(60),
            disk_ttl: Some(Duration::from_secs(3600)),
            root: dir.path().to_path_buf(),
        }
    }

    fn key(segments: &[&str]) -> CacheKey {
        CacheKey::new(segments.iter().copied())
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        let k = key(&["episodes"]);

        cache
            .set(&k, &vec!["Ep01".to_string(), "Ep02".to_string()], None)
            .await
            .unwrap();
        let value: Vec<String> = cache.get(&k).await.unwrap();
        assert_eq!(value, vec!["Ep01", "Ep02"]);
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_disk_tier_survives_restart_and_promotes() {
        let dir = TempDir::new().unwrap();
        let k = key(&["scan", "Ep01", "sq0010"]);
        {
            let cache = TwoTierCache::new(options(&dir)).unwrap();
            cache.set(&k, &42u32, None).await.unwrap();
        }

        let cache = TwoTierCache::new(options(&dir)).unwrap();
        assert_eq!(cache.get::<u32>(&k).await, Some(42));
        assert_eq!(cache.get::<u32>(&k).await, Some(42));

        let stats = cache.stats();
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.memory_entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        let k = key(&["short"]);
        cache
            .set(&k, &"v", Some(Duration::from_millis(20)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get::<String>(&k).await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_prefix_invalidation_scoped_to_episode() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        for k in [
            key(&["scan", "Ep01", "sq0010"]),
            key(&["scan", "Ep01", "sq0010", "SH0010"]),
            key(&["scan", "Ep01", "sq0020"]),
            key(&["scan", "Ep02", "sq0010"]),
        ] {
            cache.set(&k, &1u8, None).await.unwrap();
        }

        cache.invalidate_prefix(&key(&["scan", "Ep01"])).await;

        assert_eq!(cache.get::<u8>(&key(&["scan", "Ep01", "sq0010"])).await, None);
        assert_eq!(
            cache
                .get::<u8>(&key(&["scan", "Ep01", "sq0010", "SH0010"]))
                .await,
            None
        );
        assert_eq!(
            cache.get::<u8>(&key(&["scan", "Ep02", "sq0010"])).await,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        cache.set(&key(&["a"]), &1u8, None).await.unwrap();
        cache.set(&key(&["b"]), &2u8, None).await.unwrap();

        cache.invalidate(&key(&["a"])).await;
        assert_eq!(cache.get::<u8>(&key(&["a"])).await, None);
        assert_eq!(cache.get::<u8>(&key(&["b"])).await, Some(2));

        cache.clear().await.unwrap();
        assert_eq!(cache.get::<u8>(&key(&["b"])).await, None);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        let k = key(&["typed"]);
        cache.set(&k, &"not a number", None).await.unwrap();

        assert_eq!(cache.get::<u32>(&k).await, None);
        assert_eq!(cache.get_value(&k).await, None);
        assert_eq!(cache.stats().healed, 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_coalesces_concurrent_callers() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TwoTierCache::new(options(&dir)).unwrap());
        let walks = Arc::new(AtomicUsize::new(0));
        let k = key(&["shots", "Ep01", "sq0010"]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let walks = Arc::clone(&walks);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&k, None, move || async move {
                        walks.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(Computed::cacheable(vec!["SH0010".to_string()]))
                    })
                    .await
                    .unwrap()
                    .value
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), vec!["SH0010"]);
        }
        assert_eq!(walks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncacheable_results_are_not_stored() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        let k = key(&["degraded"]);

        let first = cache
            .get_or_compute(&k, None, || async { Ok(Computed::uncacheable(1u8)) })
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = cache
            .get_or_compute(&k, None, || async { Ok(Computed::cacheable(2u8)) })
            .await
            .unwrap();
        assert_eq!(second.value, 2);
        assert!(!second.from_cache);

        let third = cache
            .get_or_compute(&k, None, || async { Ok(Computed::cacheable(3u8)) })
            .await
            .unwrap();
        assert_eq!(third.value, 2);
        assert!(third.from_cache);
    }

    #[tokio::test]
    async fn test_compute_error_propagates_and_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        let k = key(&["failing"]);

        let result = cache
            .get_or_compute::<u8, _, _>(&k, None, || async { Err(CoreError::ScanCancelled) })
            .await;
        assert!(matches!(result, Err(CoreError::ScanCancelled)));
        assert_eq!(cache.get::<u8>(&k).await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.root = dir.path().join("unused");
        opts.enabled = false;
        let cache = TwoTierCache::new(opts).unwrap();

        cache.set(&key(&["a"]), &1u8, None).await.unwrap();
        assert_eq!(cache.get::<u8>(&key(&["a"])).await, None);
        assert!(!dir.path().join("unused").exists());
    }

    #[tokio::test]
    async fn test_prefix_invalidation_discards_in_flight_result() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TwoTierCache::new(options(&dir)).unwrap());
        let k = key(&["scan", "Ep01", "sq0010"]);

        let slow = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&k, None, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(Computed::cacheable("stale".to_string()))
                    })
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.invalidate_prefix(&key(&["scan", "Ep01"])).await;

        let fresh = cache
            .get_or_compute(&k, None, || async {
                Ok(Computed::cacheable("fresh".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(fresh.value, "fresh");
        assert!(!fresh.from_cache);

        // The overlapped caller still gets its own result
        assert_eq!(slow.await.unwrap().value, "stale");
        assert_eq!(cache.get::<String>(&k).await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_key_invalidation_discards_in_flight_result() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TwoTierCache::new(options(&dir)).unwrap());
        let k = key(&["episodes"]);

        let slow = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&k, None, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(Computed::cacheable(1u8))
                    })
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let invalidate = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            tokio::spawn(async move { cache.invalidate(&k).await })
        };
        slow.await.unwrap();
        invalidate.await.unwrap();

        assert_eq!(cache.get::<u8>(&k).await, None);
    }

    #[tokio::test]
    async fn test_key_locks_are_released() {
        let dir = TempDir::new().unwrap();
        let cache = TwoTierCache::new(options(&dir)).unwrap();
        cache.set(&key(&["a"]), &1u8, None).await.unwrap();
        cache.get_value(&key(&["b"])).await;
        assert!(lock_map(&cache.locks).is_empty());
    }
}
