//! Filesystem media inspector

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::{
    detect_sequences, FfprobeProbe, FrameSequence, MediaDescriptor, MediaInspector,
    MediaPreference,
};
use crate::core::config::{ProjectConfig, ScanSettings};
use crate::core::{CoreError, CoreResult};

/// Depth below a role directory searched for media (`renders/exr/*.exr`)
const MEDIA_SEARCH_DEPTH: usize = 2;

/// Inspects media on the local filesystem
pub struct FsMediaInspector {
    extensions: ScanSettings,
    fps: f64,
    probe: Option<FfprobeProbe>,
}

impl FsMediaInspector {
    pub fn new(extensions: ScanSettings, fps: f64) -> Self {
        Self {
            extensions,
            fps,
            probe: None,
        }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(config.scan.clone(), config.settings.fps)
    }

    /// Enables movie durations through ffprobe
    pub fn with_probe(mut self, probe: FfprobeProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    fn extension_of(path: &Path) -> Option<&str> {
        path.extension().and_then(|e| e.to_str())
    }

    fn list_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(MEDIA_SEARCH_DEPTH)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping media entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }

    fn sequences_in(&self, files: &[PathBuf]) -> Vec<FrameSequence> {
        let mut by_dir: BTreeMap<&Path, Vec<&str>> = BTreeMap::new();
        for file in files {
            let name = file.file_name().and_then(|n| n.to_str());
            if let (Some(parent), Some(name)) = (file.parent(), name) {
                by_dir.entry(parent).or_default().push(name);
            }
        }

        by_dir
            .into_iter()
            .flat_map(|(dir, names)| {
                detect_sequences(dir, names, |ext| self.extensions.is_image(ext))
            })
            .collect()
    }

    async fn describe_movie(&self, path: PathBuf) -> MediaDescriptor {
        let duration_frames = match &self.probe {
            Some(probe) => match probe.duration_frames(&path, self.fps).await {
                Ok(frames) => Some(frames),
                Err(e) => {
                    debug!(path = %path.display(), "Movie duration unavailable: {}", e);
                    None
                }
            },
            None => None,
        };
        MediaDescriptor::Movie {
            path,
            duration_frames,
        }
    }
}

#[async_trait]
impl MediaInspector for FsMediaInspector {
    async fn inspect(
        &self,
        dir: &Path,
        preference: MediaPreference,
    ) -> CoreResult<MediaDescriptor> {
        if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(CoreError::MediaNotFound(dir.display().to_string()));
        }

        let root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || Self::list_files(&root))
            .await
            .map_err(|e| CoreError::Internal(format!("Media listing task failed: {e}")))?;

        let movie = files
            .iter()
            .find(|f| Self::extension_of(f).is_some_and(|ext| self.extensions.is_movie(ext)))
            .cloned();

        // Longest sequence wins; ties go to the first base name
        let sequence = self
            .sequences_in(&files)
            .into_iter()
            .max_by_key(|s| (s.frame_count, Reverse(s.base_name.clone())));

        match (preference, movie, sequence) {
            (MediaPreference::Sequence, _, Some(seq)) => Ok(MediaDescriptor::FrameSequence(seq)),
            (_, Some(movie), _) => Ok(self.describe_movie(movie).await),
            (_, None, Some(seq)) => Ok(MediaDescriptor::FrameSequence(seq)),
            (_, None, None) => Err(CoreError::MediaNotFound(dir.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn inspector() -> FsMediaInspector {
        FsMediaInspector::new(ScanSettings::default(), 24.0)
    }

    #[tokio::test]
    async fn test_movie_preferred_by_default() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("SH0010_comp_v003.mov"));
        touch(&dir.path().join("SH0010_comp.1001.exr"));

        let media = inspector()
            .inspect(dir.path(), MediaPreference::Movie)
            .await
            .unwrap();
        assert_eq!(
            media,
            MediaDescriptor::Movie {
                path: dir.path().join("SH0010_comp_v003.mov"),
                duration_frames: None,
            }
        );
    }

    #[tokio::test]
    async fn test_sequence_preference_and_longest_sequence() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("SH0010_comp_v003.mov"));
        for frame in 1001..=1005 {
            touch(&dir.path().join(format!("exr/SH0010_comp.{frame}.exr")));
        }
        touch(&dir.path().join("exr/SH0010_matte.1001.exr"));

        let media = inspector()
            .inspect(dir.path(), MediaPreference::Sequence)
            .await
            .unwrap();
        match media {
            MediaDescriptor::FrameSequence(seq) => {
                assert_eq!(seq.base_name, "SH0010_comp");
                assert_eq!(seq.frame_count, 5);
                assert_eq!(seq.directory, dir.path().join("exr"));
            }
            other => panic!("expected frame sequence, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_sequence_without_movie() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("SH0010.1001.exr"));
        touch(&dir.path().join("SH0010.1003.exr"));

        let media = inspector()
            .inspect(dir.path(), MediaPreference::Movie)
            .await
            .unwrap();
        assert_eq!(media.duration_frames(), Some(3));
    }

    #[tokio::test]
    async fn test_empty_or_missing_dir_is_media_not_found() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("readme.txt"));

        let empty = inspector().inspect(dir.path(), MediaPreference::Movie).await;
        assert!(matches!(empty, Err(CoreError::MediaNotFound(_))));

        let missing = inspector()
            .inspect(&dir.path().join("nope"), MediaPreference::Movie)
            .await;
        assert!(matches!(missing, Err(CoreError::MediaNotFound(_))));
    }

    #[tokio::test]
    async fn test_unavailable_probe_leaves_duration_unknown() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("SH0010.mov"));

        let media = inspector()
            .with_probe(FfprobeProbe::new("/nonexistent/ffprobe"))
            .inspect(dir.path(), MediaPreference::Movie)
            .await
            .unwrap();
        assert_eq!(media.duration_frames(), None);
    }
}
