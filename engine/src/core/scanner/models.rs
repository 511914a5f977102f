//! Scan result models

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::core::naming::{compare_shot_names, sort_sequence_names};
use crate::core::version::VersionId;
use crate::core::{
    DepartmentName, EpisodeName, ScanId, SequenceName, ShotName, ShotRef,
};

// =============================================================================
// Warnings
// =============================================================================

/// Category of a non-fatal scan problem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanWarningKind {
    /// A directory could not be listed (permissions, I/O)
    ListingFailed,
    /// An entry inside a listed directory was unreadable (broken link)
    BrokenEntry,
    /// A name did not match the pattern expected at its level
    UnparsableName,
    /// Two directories name the same version with different padding
    AmbiguousVersion,
    /// A level of the hierarchy is empty
    StructureGap,
}

/// A non-fatal problem recorded during a scan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanWarning {
    pub kind: ScanWarningKind,
    pub path: PathBuf,
    pub message: String,
}

impl ScanWarning {
    pub fn new(kind: ScanWarningKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn listing_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanWarningKind::ListingFailed, path, message)
    }

    /// Results carrying a failed listing are degraded and never cached
    pub fn is_degrading(&self) -> bool {
        self.kind == ScanWarningKind::ListingFailed
    }
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

pub(crate) fn any_degrading(warnings: &[ScanWarning]) -> bool {
    warnings.iter().any(ScanWarning::is_degrading)
}

// =============================================================================
// Hierarchy
// =============================================================================

/// One department's versions for a shot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentInfo {
    pub name: DepartmentName,
    /// Department directory
    pub path: PathBuf,
    /// Versions with media on disk, ascending
    pub versions: Vec<VersionId>,
    /// Selected version; the latest found unless a caller selected another
    pub current: Option<VersionId>,
}

impl DepartmentInfo {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, mut versions: Vec<VersionId>) -> Self {
        versions.sort();
        versions.dedup();
        let current = versions.last().copied();
        Self {
            name: name.into(),
            path: path.into(),
            versions,
            current,
        }
    }

    pub fn latest(&self) -> Option<VersionId> {
        self.versions.last().copied()
    }

    pub fn earliest(&self) -> Option<VersionId> {
        self.versions.first().copied()
    }

    /// Rendered but empty: the directory exists without any media
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn contains(&self, version: VersionId) -> bool {
        self.versions.binary_search(&version).is_ok()
    }

    /// The stored spelling of a version present on disk
    pub fn find(&self, version: VersionId) -> Option<VersionId> {
        self.versions
            .binary_search(&version)
            .ok()
            .map(|idx| self.versions[idx])
    }

    /// Directory of one version
    pub fn version_path(&self, version: VersionId) -> PathBuf {
        let name = self.find(version).unwrap_or(version);
        self.path.join(name.to_string())
    }
}

/// One shot and its departments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotInfo {
    pub episode: EpisodeName,
    pub sequence: SequenceName,
    pub shot: ShotName,
    /// Shot directory
    pub path: PathBuf,
    /// Departments with a directory on disk, keyed by name
    pub departments: BTreeMap<DepartmentName, DepartmentInfo>,
}

impl ShotInfo {
    pub fn new(shot: &ShotRef, path: impl Into<PathBuf>) -> Self {
        Self {
            episode: shot.episode.clone(),
            sequence: shot.sequence.clone(),
            shot: shot.shot.clone(),
            path: path.into(),
            departments: BTreeMap::new(),
        }
    }

    /// `{episode}_{sequence}_{shot}`
    pub fn full_name(&self) -> String {
        self.shot_ref().full_name()
    }

    pub fn shot_ref(&self) -> ShotRef {
        ShotRef::new(&self.episode, &self.sequence, &self.shot)
    }

    pub fn department(&self, name: &str) -> Option<&DepartmentInfo> {
        self.departments.get(name)
    }

    /// Departments with at least one version
    pub fn rendered_departments(&self) -> impl Iterator<Item = &DepartmentInfo> {
        self.departments.values().filter(|d| !d.is_empty())
    }
}

/// Cached payload for one shot's department/version walk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotScan {
    pub shot: ShotInfo,
    pub warnings: Vec<ScanWarning>,
}

/// Cached payload for a complete sequence sub-scan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceScan {
    pub episode: EpisodeName,
    pub sequence: SequenceName,
    /// Ordered by shot number
    pub shots: Vec<ShotInfo>,
    pub warnings: Vec<ScanWarning>,
}

/// Cached payload for one directory level listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelListing {
    pub names: Vec<String>,
    pub warnings: Vec<ScanWarning>,
}

// =============================================================================
// Scan Result
// =============================================================================

/// Immutable result of a full scan
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub scan_id: ScanId,
    pub scanned_at: DateTime<Utc>,
    pub root: PathBuf,
    /// episode -> sequence -> shots ordered by shot number
    pub episodes: HashMap<EpisodeName, BTreeMap<SequenceName, Vec<ShotInfo>>>,
    /// Directory entries read from disk
    pub entries_visited: u64,
    /// Sub-scans served from the cache
    pub from_cache: u64,
    pub duration_ms: u64,
    pub warnings: Vec<ScanWarning>,
}

impl ScanResult {
    /// Empty result for `root`, stamped now
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            scan_id: Ulid::new().to_string(),
            scanned_at: Utc::now(),
            root: root.into(),
            episodes: HashMap::new(),
            entries_visited: 0,
            from_cache: 0,
            duration_ms: 0,
            warnings: Vec::new(),
        }
    }

    /// Stores (or replaces) one sequence sub-scan
    pub fn insert_sequence(&mut self, scan: SequenceScan) {
        let sequence_dir = self.root.join(&scan.episode).join(&scan.sequence);
        self.warnings.retain(|w| !w.path.starts_with(&sequence_dir));
        self.warnings.extend(scan.warnings);
        self.episodes
            .entry(scan.episode)
            .or_default()
            .insert(scan.sequence, scan.shots);
    }

    pub fn has_sequence(&self, episode: &str, sequence: &str) -> bool {
        self.episodes
            .get(episode)
            .is_some_and(|seqs| seqs.contains_key(sequence))
    }

    pub fn shot(&self, episode: &str, sequence: &str, shot: &str) -> Option<&ShotInfo> {
        self.shots_in(episode, sequence)
            .iter()
            .find(|s| s.shot == shot)
    }

    /// Marks `version` as the selected version of one shot's department.
    /// False when the shot, department or version is not in the result.
    pub fn select_version(&mut self, shot: &ShotRef, department: &str, version: VersionId) -> bool {
        let dept = self
            .episodes
            .get_mut(&shot.episode)
            .and_then(|seqs| seqs.get_mut(&shot.sequence))
            .and_then(|shots| shots.iter_mut().find(|s| s.shot == shot.shot))
            .and_then(|info| info.departments.get_mut(department));
        match dept {
            Some(dept) if dept.contains(version) => {
                dept.current = dept.find(version);
                true
            }
            _ => false,
        }
    }

    /// Shots of one sequence; empty when unknown
    pub fn shots_in(&self, episode: &str, sequence: &str) -> &[ShotInfo] {
        self.episodes
            .get(episode)
            .and_then(|seqs| seqs.get(sequence))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Episode ids in numeric order
    pub fn episode_ids(&self) -> Vec<EpisodeName> {
        let mut ids: Vec<EpisodeName> = self.episodes.keys().cloned().collect();
        ids.sort_by(|a, b| compare_shot_names(a, b));
        ids
    }

    /// Sequence ids of an episode in numeric order
    pub fn sequence_ids(&self, episode: &str) -> Vec<SequenceName> {
        let mut ids: Vec<SequenceName> = self
            .episodes
            .get(episode)
            .map(|seqs| seqs.keys().cloned().collect())
            .unwrap_or_default();
        sort_sequence_names(&mut ids);
        ids
    }

    pub fn shot_count(&self) -> usize {
        self.episodes
            .values()
            .flat_map(|seqs| seqs.values())
            .map(Vec::len)
            .sum()
    }

    /// Replaces the sequences present in `newer`, keeping everything else
    pub fn merge(&mut self, newer: ScanResult) {
        for (episode, sequences) in newer.episodes {
            let target = self.episodes.entry(episode).or_default();
            for (sequence, shots) in sequences {
                target.insert(sequence, shots);
            }
        }
        self.scan_id = newer.scan_id;
        self.scanned_at = newer.scanned_at;
        self.entries_visited += newer.entries_visited;
        self.from_cache += newer.from_cache;
        self.duration_ms = newer.duration_ms;
        self.warnings = newer.warnings;
    }
}

/// Lifecycle of a scan operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    Failed(String),
}

/// Structural report over a full scan
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureReport {
    pub episodes: usize,
    pub sequences: usize,
    pub shots: usize,
    pub warnings: Vec<ScanWarning>,
}

impl StructureReport {
    pub fn is_valid(&self) -> bool {
        self.warnings.is_empty()
    }
}
