//! In-memory cache tier
//!
//! Bounded by entry count with least-recently-used eviction. Each entry
//! also carries a deadline, capped by the tier's own maximum TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{CacheKey, CacheRecord, CacheTier, TierCounters};
use crate::core::CoreResult;

struct MemoryEntry {
    record: CacheRecord,
    expires_at: Option<DateTime<Utc>>,
    last_accessed: u64,
}

impl MemoryEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<CacheKey, MemoryEntry>,
    tick: u64,
}

impl MemoryState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// LRU memory tier
pub struct MemoryTier {
    capacity: usize,
    max_ttl: Option<Duration>,
    state: Mutex<MemoryState>,
    evictions: AtomicU64,
}

impl MemoryTier {
    /// `capacity` is an entry count (at least 1); `max_ttl` caps every
    /// entry's lifetime in memory
    pub fn new(capacity: usize, max_ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            max_ttl,
            state: Mutex::new(MemoryState::default()),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // The state stays consistent across a panicking holder.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deadline(&self, record: &CacheRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cap = self
            .max_ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        match (record.expires_at(), cap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Evicts the least recently used entry
    fn evict_one(&self, state: &mut MemoryState) -> bool {
        let key_to_evict = state
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());

        match key_to_evict {
            Some(key) => {
                state.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Evicted memory cache entry");
                true
            }
            None => false,
        }
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &CacheKey) -> CoreResult<Option<CacheRecord>> {
        let now = Utc::now();
        let mut state = self.state();
        let tick = state.next_tick();

        if state.entries.get(key).is_some_and(|e| e.is_expired_at(now)) {
            state.entries.remove(key);
            return Ok(None);
        }

        Ok(state.entries.get_mut(key).map(|entry| {
            entry.last_accessed = tick;
            entry.record.clone()
        }))
    }

    fn set(&self, record: CacheRecord) -> CoreResult<()> {
        let now = Utc::now();
        let expires_at = self.deadline(&record, now);
        let mut state = self.state();
        let tick = state.next_tick();

        state.entries.insert(
            record.key.clone(),
            MemoryEntry {
                record,
                expires_at,
                last_accessed: tick,
            },
        );

        while state.entries.len() > self.capacity {
            if !self.evict_one(&mut state) {
                break;
            }
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> CoreResult<bool> {
        Ok(self.state().entries.remove(key).is_some())
    }

    fn remove_prefix(&self, prefix: &CacheKey) -> CoreResult<usize> {
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - state.entries.len())
    }

    fn clear(&self) -> CoreResult<()> {
        self.state().entries.clear();
        Ok(())
    }

    fn sweep_expired(&self) -> CoreResult<usize> {
        let now = Utc::now();
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before - state.entries.len())
    }

    fn len(&self) -> usize {
        self.state().entries.len()
    }

    fn counters(&self) -> TierCounters {
        TierCounters {
            evictions: self.evictions.load(Ordering::Relaxed),
            healed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &[&str], value: serde_json::Value) -> CacheRecord {
        CacheRecord::new(CacheKey::new(key.iter().copied()), value, None)
    }

    #[test]
    fn test_set_get_remove() {
        let tier = MemoryTier::new(4, None);
        tier.set(record(&["a"], json!(1))).unwrap();

        let hit = tier.get(&CacheKey::from(["a"])).unwrap().unwrap();
        assert_eq!(hit.value, json!(1));
        assert!(tier.remove(&CacheKey::from(["a"])).unwrap());
        assert!(!tier.remove(&CacheKey::from(["a"])).unwrap());
        assert!(tier.get(&CacheKey::from(["a"])).unwrap().is_none());
    }

    #[test]
    fn test_lru_eviction_by_entry_count() {
        let tier = MemoryTier::new(2, None);
        tier.set(record(&["a"], json!(1))).unwrap();
        tier.set(record(&["b"], json!(2))).unwrap();

        // Touch "a" so "b" becomes least recently used
        tier.get(&CacheKey::from(["a"])).unwrap();
        tier.set(record(&["c"], json!(3))).unwrap();

        assert_eq!(tier.len(), 2);
        assert!(tier.get(&CacheKey::from(["a"])).unwrap().is_some());
        assert!(tier.get(&CacheKey::from(["b"])).unwrap().is_none());
        assert!(tier.get(&CacheKey::from(["c"])).unwrap().is_some());
        assert_eq!(tier.counters().evictions, 1);
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let tier = MemoryTier::new(8, None);
        let mut stale = record(&["old"], json!("x"));
        stale.inserted_at = Utc::now() - chrono::Duration::seconds(10);
        stale.ttl = Some(Duration::from_secs(1));
        tier.set(stale).unwrap();

        assert!(tier.get(&CacheKey::from(["old"])).unwrap().is_none());
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_max_ttl_caps_lifetime() {
        let tier = MemoryTier::new(8, Some(Duration::ZERO));
        tier.set(record(&["a"], json!(1))).unwrap();
        assert!(tier.get(&CacheKey::from(["a"])).unwrap().is_none());
    }

    #[test]
    fn test_remove_prefix() {
        let tier = MemoryTier::new(8, None);
        tier.set(record(&["scan", "Ep01", "sq0010"], json!(1))).unwrap();
        tier.set(record(&["scan", "Ep01", "sq0020"], json!(2))).unwrap();
        tier.set(record(&["scan", "Ep02", "sq0010"], json!(3))).unwrap();

        let removed = tier.remove_prefix(&CacheKey::from(["scan", "Ep01"])).unwrap();
        assert_eq!(removed, 2);
        assert!(tier
            .get(&CacheKey::from(["scan", "Ep02", "sq0010"]))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_sweep_expired() {
        let tier = MemoryTier::new(8, None);
        let mut stale = record(&["old"], json!(1));
        stale.inserted_at = Utc::now() - chrono::Duration::seconds(10);
        stale.ttl = Some(Duration::from_secs(1));
        tier.set(stale).unwrap();
        tier.set(record(&["fresh"], json!(2))).unwrap();

        assert_eq!(tier.sweep_expired().unwrap(), 1);
        assert_eq!(tier.len(), 1);
    }
}
