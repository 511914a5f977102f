//! Shotline Core Type Definitions
//!
//! Defines fundamental types used throughout the engine.

use serde::{Deserialize, Serialize};

// =============================================================================
// Name Types
// =============================================================================

/// Episode directory name (e.g. `Ep01`)
pub type EpisodeName = String;

/// Sequence directory name (e.g. `sq0010`)
pub type SequenceName = String;

/// Shot directory name (e.g. `SH0010`)
pub type ShotName = String;

/// Department directory name (e.g. `comp`)
pub type DepartmentName = String;

/// Media role name from the project config (e.g. `renders`)
pub type MediaRole = String;

/// Scan unique identifier (ULID)
pub type ScanId = String;

// =============================================================================
// Frame Types
// =============================================================================

/// Frame number as found in image sequence file names
pub type FrameNumber = u64;

/// Inclusive frame range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRange {
    pub first: FrameNumber,
    pub last: FrameNumber,
}

impl FrameRange {
    /// Creates a range, swapping bounds given in the wrong order
    pub fn new(a: FrameNumber, b: FrameNumber) -> Self {
        if a <= b {
            Self { first: a, last: b }
        } else {
            Self { first: b, last: a }
        }
    }

    /// Number of frames covered by the range
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        frame >= self.first && frame <= self.last
    }
}

/// Identity of a shot inside the project hierarchy
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotRef {
    pub episode: EpisodeName,
    pub sequence: SequenceName,
    pub shot: ShotName,
}

impl ShotRef {
    pub fn new(
        episode: impl Into<String>,
        sequence: impl Into<String>,
        shot: impl Into<String>,
    ) -> Self {
        Self {
            episode: episode.into(),
            sequence: sequence.into(),
            shot: shot.into(),
        }
    }

    /// `{episode}_{sequence}_{shot}`
    pub fn full_name(&self) -> String {
        format!("{}_{}_{}", self.episode, self.sequence, self.shot)
    }
}

impl std::fmt::Display for ShotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.episode, self.sequence, self.shot)
    }
}
