//! On-disk cache tier
//!
//! One JSON unit per key. Each key segment becomes one directory level
//! (encoded with [`encode_path_segment`]) and the unit itself is
//! `@entry.json` inside the key's directory, so a key prefix maps to a
//! directory subtree.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{CacheKey, CacheRecord, CacheTier, TierCounters};
use crate::core::fs::{atomic_write_json, encode_path_segment, is_temp_file_name};
use crate::core::CoreResult;

/// File name of a stored unit inside its key directory
pub const UNIT_FILE_NAME: &str = "@entry.json";

/// Lock file at the cache root
pub const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, Serialize, Deserialize)]
struct DiskUnit {
    key: CacheKey,
    value: serde_json::Value,
    inserted_at: DateTime<Utc>,
    ttl_secs: Option<f64>,
}

impl DiskUnit {
    fn from_record(record: CacheRecord) -> Self {
        Self {
            key: record.key,
            value: record.value,
            inserted_at: record.inserted_at,
            ttl_secs: record.ttl.map(|ttl| ttl.as_secs_f64()),
        }
    }

    fn into_record(self) -> Result<CacheRecord, String> {
        let ttl = match self.ttl_secs {
            None => None,
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| format!("bad ttl_secs {secs}: {e}"))?,
            ),
        };
        Ok(CacheRecord {
            key: self.key,
            value: self.value,
            inserted_at: self.inserted_at,
            ttl,
        })
    }
}

enum UnitRead {
    Missing,
    Live(CacheRecord),
    Expired,
    Corrupt(String),
}

/// Persistent tier rooted at a cache directory
pub struct DiskTier {
    root: PathBuf,
    healed: AtomicU64,
}

impl DiskTier {
    pub fn new(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            healed: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory addressed by a key
    pub fn key_dir(&self, key: &CacheKey) -> PathBuf {
        key.segments()
            .iter()
            .fold(self.root.clone(), |dir, seg| dir.join(encode_path_segment(seg)))
    }

    /// Unit file addressed by a key
    pub fn unit_path(&self, key: &CacheKey) -> PathBuf {
        self.key_dir(key).join(UNIT_FILE_NAME)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        fs::create_dir_all(&self.root)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE_NAME))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock disk cache: {}", e);
        }

        result
    }

    fn read_unit(path: &Path, expected: Option<&CacheKey>) -> UnitRead {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return UnitRead::Missing,
            Err(e) => return UnitRead::Corrupt(format!("unreadable: {e}")),
        };

        let unit: DiskUnit = match serde_json::from_reader(io::BufReader::new(file)) {
            Ok(unit) => unit,
            Err(e) => return UnitRead::Corrupt(format!("invalid JSON: {e}")),
        };

        if let Some(expected) = expected {
            if &unit.key != expected {
                return UnitRead::Corrupt(format!(
                    "holds key {} instead of {}",
                    unit.key, expected
                ));
            }
        }

        match unit.into_record() {
            Ok(record) if record.is_expired() => UnitRead::Expired,
            Ok(record) => UnitRead::Live(record),
            Err(reason) => UnitRead::Corrupt(reason),
        }
    }

    fn heal(&self, path: &Path, reason: &str) {
        warn!(path = %path.display(), reason, "Corrupt cache unit, deleting");
        self.healed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), "Failed to delete corrupt cache unit: {}", e);
            }
        }
    }

    /// Removes empty key directories between `dir` and the root
    fn prune_empty_dirs(&self, mut dir: PathBuf) {
        while dir != self.root && dir.starts_with(&self.root) {
            if fs::remove_dir(&dir).is_err() {
                break;
            }
            if !dir.pop() {
                break;
            }
        }
    }

    fn unit_files(&self, under: &Path) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(under)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping cache entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == UNIT_FILE_NAME)
            .map(|entry| entry.into_path())
    }
}

impl CacheTier for DiskTier {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn get(&self, key: &CacheKey) -> CoreResult<Option<CacheRecord>> {
        let path = self.unit_path(key);
        match Self::read_unit(&path, Some(key)) {
            UnitRead::Missing => Ok(None),
            UnitRead::Live(record) => Ok(Some(record)),
            UnitRead::Expired => {
                debug!(key = %key, "Disk cache unit expired");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
            UnitRead::Corrupt(reason) => {
                self.heal(&path, &reason);
                Ok(None)
            }
        }
    }

    fn set(&self, record: CacheRecord) -> CoreResult<()> {
        let path = self.unit_path(&record.key);
        let unit = DiskUnit::from_record(record);
        self.with_lock(false, || atomic_write_json(&path, &unit))
    }

    fn remove(&self, key: &CacheKey) -> CoreResult<bool> {
        let dir = self.key_dir(key);
        self.with_lock(true, || match fs::remove_file(dir.join(UNIT_FILE_NAME)) {
            Ok(()) => {
                self.prune_empty_dirs(dir.clone());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
    }

    fn remove_prefix(&self, prefix: &CacheKey) -> CoreResult<usize> {
        if prefix.is_empty() {
            let count = self.len();
            self.clear()?;
            return Ok(count);
        }

        let dir = self.key_dir(prefix);
        self.with_lock(true, || {
            if !dir.exists() {
                return Ok(0);
            }
            let count = self.unit_files(&dir).count();
            fs::remove_dir_all(&dir)?;
            if let Some(parent) = dir.parent() {
                self.prune_empty_dirs(parent.to_path_buf());
            }
            Ok(count)
        })
    }

    fn clear(&self) -> CoreResult<()> {
        self.with_lock(true, || {
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                if entry.file_name() == LOCK_FILE_NAME {
                    continue;
                }
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
            Ok(())
        })
    }

    fn sweep_expired(&self) -> CoreResult<usize> {
        self.with_lock(true, || {
            let mut removed = 0;
            let units: Vec<PathBuf> = self.unit_files(&self.root).collect();
            for path in units {
                match Self::read_unit(&path, None) {
                    UnitRead::Live(_) | UnitRead::Missing => {}
                    UnitRead::Expired => {
                        if fs::remove_file(&path).is_ok() {
                            removed += 1;
                        }
                    }
                    UnitRead::Corrupt(reason) => {
                        self.heal(&path, &reason);
                        removed += 1;
                    }
                }
                if let Some(parent) = path.parent() {
                    self.prune_empty_dirs(parent.to_path_buf());
                }
            }

            // Temp files left behind by interrupted writes
            let stale: Vec<PathBuf> = WalkDir::new(&self.root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| {
                    e.file_type().is_file() && is_temp_file_name(&e.file_name().to_string_lossy())
                })
                .map(|e| e.into_path())
                .collect();
            for path in stale {
                let _ = fs::remove_file(path);
            }

            Ok(removed)
        })
    }

    fn len(&self) -> usize {
        self.unit_files(&self.root).count()
    }

    fn counters(&self) -> TierCounters {
        TierCounters {
            evictions: 0,
            healed: self.healed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn key(segments: &[&str]) -> CacheKey {
        CacheKey::new(segments.iter().copied())
    }

    fn record(segments: &[&str], value: serde_json::Value) -> CacheRecord {
        CacheRecord::new(key(segments), value, None)
    }

    #[test]
    fn test_roundtrip_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        {
            let tier = DiskTier::new(dir.path()).unwrap();
            tier.set(record(&["scan", "Ep01", "sq0010"], json!({"shots": 3})))
                .unwrap();
        }

        let tier = DiskTier::new(dir.path()).unwrap();
        let hit = tier.get(&key(&["scan", "Ep01", "sq0010"])).unwrap().unwrap();
        assert_eq!(hit.value, json!({"shots": 3}));
        assert!(dir
            .path()
            .join("scan/Ep01/sq0010")
            .join(UNIT_FILE_NAME)
            .is_file());
    }

    #[test]
    fn test_parent_and_child_keys_coexist() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        tier.set(record(&["scan", "Ep01"], json!("parent"))).unwrap();
        tier.set(record(&["scan", "Ep01", "sq0010"], json!("child")))
            .unwrap();

        assert_eq!(
            tier.get(&key(&["scan", "Ep01"])).unwrap().unwrap().value,
            json!("parent")
        );
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_hostile_segments_stay_under_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let tier = DiskTier::new(&root).unwrap();
        tier.set(record(&["..", "/etc", "a\\b"], json!(1))).unwrap();

        let path = tier.unit_path(&key(&["..", "/etc", "a\\b"]));
        assert!(path.starts_with(&root));
        assert!(path.is_file());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_unit_is_healed() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        let k = key(&["episodes"]);
        let path = tier.unit_path(&k);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        assert!(tier.get(&k).unwrap().is_none());
        assert!(!path.exists());
        assert_eq!(tier.counters().healed, 1);
    }

    #[test]
    fn test_unit_with_foreign_key_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        tier.set(record(&["a"], json!(1))).unwrap();
        fs::create_dir_all(tier.key_dir(&key(&["b"]))).unwrap();
        fs::copy(tier.unit_path(&key(&["a"])), tier.unit_path(&key(&["b"]))).unwrap();

        assert!(tier.get(&key(&["b"])).unwrap().is_none());
        assert!(tier.get(&key(&["a"])).unwrap().is_some());
    }

    #[test]
    fn test_expired_unit_is_deleted_on_access() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        let mut stale = record(&["old"], json!(1));
        stale.inserted_at = Utc::now() - chrono::Duration::hours(2);
        stale.ttl = Some(Duration::from_secs(3600));
        tier.set(stale).unwrap();

        assert!(tier.get(&key(&["old"])).unwrap().is_none());
        assert!(!tier.unit_path(&key(&["old"])).exists());
    }

    #[test]
    fn test_remove_prefix_leaves_siblings() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        tier.set(record(&["scan", "Ep01", "sq0010"], json!(1))).unwrap();
        tier.set(record(&["scan", "Ep01", "sq0010", "SH0010"], json!(2)))
            .unwrap();
        tier.set(record(&["scan", "Ep02", "sq0010"], json!(3))).unwrap();

        assert_eq!(tier.remove_prefix(&key(&["scan", "Ep01"])).unwrap(), 2);
        assert!(tier.get(&key(&["scan", "Ep01", "sq0010"])).unwrap().is_none());
        assert!(tier.get(&key(&["scan", "Ep02", "sq0010"])).unwrap().is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        tier.set(record(&["a", "b"], json!(1))).unwrap();
        tier.set(record(&["c"], json!(2))).unwrap();

        assert!(tier.remove(&key(&["a", "b"])).unwrap());
        assert!(!tier.remove(&key(&["a", "b"])).unwrap());
        assert!(!dir.path().join("a").exists());

        tier.clear().unwrap();
        assert!(tier.is_empty());
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_sweep_expired_removes_dead_and_corrupt_units() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path()).unwrap();
        let mut stale = record(&["old"], json!(1));
        stale.inserted_at = Utc::now() - chrono::Duration::hours(2);
        stale.ttl = Some(Duration::from_secs(60));
        tier.set(stale).unwrap();
        tier.set(record(&["fresh"], json!(2))).unwrap();

        let bad = tier.unit_path(&key(&["bad"]));
        fs::create_dir_all(bad.parent().unwrap()).unwrap();
        fs::write(&bad, b"garbage").unwrap();

        assert_eq!(tier.sweep_expired().unwrap(), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.get(&key(&["fresh"])).unwrap().is_some());
    }
}
