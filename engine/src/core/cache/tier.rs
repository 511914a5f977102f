//! Cache tier abstraction

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::CacheKey;
use crate::core::CoreResult;

/// One stored value with its insertion time and optional time-to-live
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRecord {
    pub key: CacheKey,
    pub value: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Option<Duration>,
}

impl CacheRecord {
    pub fn new(key: CacheKey, value: serde_json::Value, ttl: Option<Duration>) -> Self {
        Self {
            key,
            value,
            inserted_at: Utc::now(),
            ttl,
        }
    }

    /// Instant after which the record is dead; `None` never expires
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| self.inserted_at.checked_add_signed(ttl))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Counters a tier keeps about itself
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierCounters {
    /// Entries dropped to respect a capacity bound
    pub evictions: u64,
    /// Corrupt units detected and deleted
    pub healed: u64,
}

/// A key/value storage level.
///
/// Tiers hide expired records: `get` never returns one and removes it lazily.
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;

    fn get(&self, key: &CacheKey) -> CoreResult<Option<CacheRecord>>;

    fn set(&self, record: CacheRecord) -> CoreResult<()>;

    /// Removes one key; returns whether it was present
    fn remove(&self, key: &CacheKey) -> CoreResult<bool>;

    /// Removes every key starting with `prefix`; returns the count removed
    fn remove_prefix(&self, prefix: &CacheKey) -> CoreResult<usize>;

    fn clear(&self) -> CoreResult<()>;

    /// Drops every expired record; returns the count removed
    fn sweep_expired(&self) -> CoreResult<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn counters(&self) -> TierCounters {
        TierCounters::default()
    }
}
