//! Scan Cache
//!
//! Generic two-tier key/value store (memory over disk) with TTLs, explicit
//! prefix invalidation and per-key request coalescing. Knows nothing about
//! the project hierarchy; the scanner chooses the keys.

mod disk;
mod key;
mod manager;
mod memory;
mod tier;

pub use disk::{DiskTier, LOCK_FILE_NAME, UNIT_FILE_NAME};
pub use key::CacheKey;
pub use manager::{CacheOptions, CacheStats, Computed, Fetched, TwoTierCache};
pub use memory::MemoryTier;
pub use tier::{CacheRecord, CacheTier, TierCounters};
