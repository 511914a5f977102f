//! Timeline Model Definitions
//!
//! Resolved entries handed to the host timeline, plus the skip and warning
//! records that accompany a build.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::VersionPolicy;
use crate::core::media::{AudioMatch, MediaDescriptor};
use crate::core::version::VersionId;
use crate::core::{
    CoreError, DepartmentName, EpisodeName, FrameNumber, SequenceName, ShotName, ShotRef,
};

// =============================================================================
// Entries
// =============================================================================

/// One shot resolved to a department version
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTimelineEntry {
    pub shot: ShotRef,
    pub department: DepartmentName,
    /// Version actually selected
    pub version: VersionId,
    /// Policy the version was resolved with
    pub policy: VersionPolicy,
    /// Versions on disk at resolution time, ascending
    pub available_versions: Vec<VersionId>,
    pub version_path: PathBuf,
    /// Concrete media; `None` when the version holds nothing inspectable
    pub media: Option<MediaDescriptor>,
    pub audio: AudioMatch,
    /// First timeline frame, once positions are assigned
    pub record_in: Option<FrameNumber>,
    /// Last timeline frame (inclusive)
    pub record_out: Option<FrameNumber>,
}

impl ResolvedTimelineEntry {
    /// `{episode}_{sequence}_{shot}`, the clip name on the timeline
    pub fn full_name(&self) -> String {
        self.shot.full_name()
    }

    /// Media length in frames, or `default` when unknown
    pub fn duration_or(&self, default: u64) -> u64 {
        self.media
            .as_ref()
            .and_then(MediaDescriptor::duration_frames)
            .filter(|frames| *frames > 0)
            .unwrap_or(default)
    }

    pub fn is_latest(&self) -> bool {
        self.available_versions.last() == Some(&self.version)
    }
}

// =============================================================================
// Build Records
// =============================================================================

/// A requested shot that produced no entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedShot {
    pub episode: EpisodeName,
    pub sequence: SequenceName,
    pub shot: ShotName,
    pub department: DepartmentName,
    pub reason: String,
}

impl SkippedShot {
    pub fn new(shot: &ShotRef, department: &str, reason: impl Into<String>) -> Self {
        Self {
            episode: shot.episode.clone(),
            sequence: shot.sequence.clone(),
            shot: shot.shot.clone(),
            department: department.to_string(),
            reason: reason.into(),
        }
    }

    pub fn from_error(shot: &ShotRef, department: &str, error: &CoreError) -> Self {
        Self::new(shot, department, error.to_string())
    }
}

/// Category of a build warning
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildWarningKind {
    /// The requested version was missing and another was used
    VersionFallback,
    /// The version directory held no inspectable media
    MediaMissing,
    /// A step had no further version in its direction
    StepBlocked,
    /// Carried over from the scan
    Scan,
}

/// A non-fatal problem recorded during a build
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildWarning {
    pub kind: BuildWarningKind,
    /// Full shot name, when the warning concerns one shot
    pub shot: Option<String>,
    pub message: String,
}

impl BuildWarning {
    pub fn for_shot(kind: BuildWarningKind, shot: &ShotRef, message: impl Into<String>) -> Self {
        Self {
            kind,
            shot: Some(shot.full_name()),
            message: message.into(),
        }
    }

    pub fn general(kind: BuildWarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            shot: None,
            message: message.into(),
        }
    }
}

/// Ordered entries plus everything that did not resolve cleanly
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// Timeline name (`Ep01_sq0010_review`, `Ep01_all_review`)
    pub name: String,
    pub entries: Vec<ResolvedTimelineEntry>,
    pub skipped: Vec<SkippedShot>,
    pub warnings: Vec<BuildWarning>,
}

impl BuildResult {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends another build, keeping this one's name
    pub fn extend(&mut self, other: BuildResult) {
        self.entries.extend(other.entries);
        self.skipped.extend(other.skipped);
        self.warnings.extend(other.warnings);
    }

    /// Total timeline length in frames, once positions are assigned
    pub fn duration_frames(&self) -> u64 {
        self.entries
            .last()
            .and_then(|e| e.record_out)
            .map_or(0, |out| out + 1)
    }
}

// =============================================================================
// Requests & Updates
// =============================================================================

/// Builder behavior switches
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    /// Keep sub-shots (`SH0010A`) instead of skipping them
    pub include_sub_shots: bool,
}

/// A multi-sequence timeline request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRequest {
    pub episode: EpisodeName,
    pub sequences: Vec<SequenceName>,
    /// Defaults to the project's primary department
    #[serde(default)]
    pub department: Option<DepartmentName>,
    #[serde(default)]
    pub policy: VersionPolicy,
}

/// Differences between an existing timeline and a fresh build
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineUpdate {
    /// Shots not on the existing timeline
    pub added: Vec<ResolvedTimelineEntry>,
    /// Shots whose version (or department) changed
    pub updated: Vec<ResolvedTimelineEntry>,
    /// Full names of shots already up to date
    pub unchanged: Vec<String>,
}

impl TimelineUpdate {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }
}
