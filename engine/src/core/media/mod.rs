//! Media Inspection
//!
//! Turns a version's media directory into a concrete descriptor (a movie
//! file or a frame sequence), locates per-shot audio and reads layered
//! lighting renders.

mod audio;
mod inspector;
mod lighting;
mod probe;
mod sequence;

pub use audio::{AudioLocator, AudioMatch};
pub use inspector::FsMediaInspector;
pub use lighting::{
    LightingLayer, LightingScan, LightingScanner, LightingVersion, RenderPass,
    LAYERED_VERSION_DIR,
};
pub use probe::FfprobeProbe;
pub use sequence::detect_sequences;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{CoreResult, FrameNumber, FrameRange};

/// Which media kind wins when a version has both
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaPreference {
    #[default]
    Movie,
    Sequence,
}

/// Numbered image files sharing a base name and extension
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSequence {
    pub directory: PathBuf,
    pub base_name: String,
    pub extension: String,
    /// Digit count of the frame token
    pub padding: usize,
    pub first_frame: FrameNumber,
    pub last_frame: FrameNumber,
    /// Frames present on disk
    pub frame_count: u64,
    /// Gaps between first and last frame, ascending
    pub missing_frames: Vec<FrameNumber>,
}

impl FrameSequence {
    /// `name.####.exr`
    pub fn pattern(&self) -> String {
        format!(
            "{}.{}.{}",
            self.base_name,
            "#".repeat(self.padding),
            self.extension
        )
    }

    /// `name.%04d.exr`
    pub fn printf_pattern(&self) -> String {
        format!(
            "{}.%0{}d.{}",
            self.base_name, self.padding, self.extension
        )
    }

    pub fn frame_range(&self) -> FrameRange {
        FrameRange::new(self.first_frame, self.last_frame)
    }

    pub fn is_complete(&self) -> bool {
        self.missing_frames.is_empty()
    }

    /// Path of one frame of the sequence
    pub fn frame_path(&self, frame: FrameNumber) -> PathBuf {
        self.directory.join(format!(
            "{}.{:0width$}.{}",
            self.base_name,
            frame,
            self.extension,
            width = self.padding
        ))
    }
}

/// Concrete media resolved for one version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MediaDescriptor {
    #[serde(rename_all = "camelCase")]
    Movie {
        path: PathBuf,
        /// Unknown when no probe is available
        duration_frames: Option<u64>,
    },
    FrameSequence(FrameSequence),
}

impl MediaDescriptor {
    /// Length in frames, when known
    pub fn duration_frames(&self) -> Option<u64> {
        match self {
            MediaDescriptor::Movie {
                duration_frames, ..
            } => *duration_frames,
            MediaDescriptor::FrameSequence(seq) => Some(seq.frame_range().len()),
        }
    }

    /// Movie file, or the first frame of a sequence
    pub fn primary_path(&self) -> PathBuf {
        match self {
            MediaDescriptor::Movie { path, .. } => path.clone(),
            MediaDescriptor::FrameSequence(seq) => seq.frame_path(seq.first_frame),
        }
    }

    pub fn is_movie(&self) -> bool {
        matches!(self, MediaDescriptor::Movie { .. })
    }
}

/// Capability returning media facts for a version's media directory
#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Fails with `MediaNotFound` when the directory holds no usable media
    async fn inspect(&self, dir: &Path, preference: MediaPreference)
        -> CoreResult<MediaDescriptor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sequence() -> FrameSequence {
        FrameSequence {
            directory: PathBuf::from("/renders"),
            base_name: "SH0010_comp".into(),
            extension: "exr".into(),
            padding: 4,
            first_frame: 1001,
            last_frame: 1010,
            frame_count: 9,
            missing_frames: vec![1005],
        }
    }

    #[test]
    fn test_sequence_patterns() {
        let seq = sample_sequence();
        assert_eq!(seq.pattern(), "SH0010_comp.####.exr");
        assert_eq!(seq.printf_pattern(), "SH0010_comp.%04d.exr");
        assert_eq!(
            seq.frame_path(1001),
            PathBuf::from("/renders/SH0010_comp.1001.exr")
        );
        assert!(!seq.is_complete());
    }

    #[test]
    fn test_descriptor_duration() {
        let seq = MediaDescriptor::FrameSequence(sample_sequence());
        assert_eq!(seq.duration_frames(), Some(10));
        assert!(!seq.is_movie());

        let movie = MediaDescriptor::Movie {
            path: PathBuf::from("/renders/SH0010.mov"),
            duration_frames: None,
        };
        assert_eq!(movie.duration_frames(), None);
        assert_eq!(movie.primary_path(), PathBuf::from("/renders/SH0010.mov"));
    }

    #[test]
    fn test_descriptor_serializes_with_kind_tag() {
        let movie = MediaDescriptor::Movie {
            path: PathBuf::from("/a.mov"),
            duration_frames: Some(48),
        };
        let json = serde_json::to_value(&movie).unwrap();
        assert_eq!(json["kind"], "movie");
        assert_eq!(json["durationFrames"], 48);
    }

    #[test]
    fn test_preference_serde() {
        let pref: MediaPreference = serde_json::from_str("\"sequence\"").unwrap();
        assert_eq!(pref, MediaPreference::Sequence);
        assert_eq!(MediaPreference::default(), MediaPreference::Movie);
    }
}
