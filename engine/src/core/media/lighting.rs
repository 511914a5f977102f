//! Lighting Renders
//!
//! Lighting versions hold one directory per render layer, each with one or
//! more render passes as image sequences:
//!
//! ```text
//! {shot}/lighting/version/v001/MASTER_CHAR_A/beauty.1001.exr
//! {shot}/lighting/version/v001/MASTER_CHAR_A/spec.1001.exr
//! {shot}/lighting/version/v002/MASTER_ENV/beauty.1001.exr
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{detect_sequences, FrameSequence};
use crate::core::config::{ProjectConfig, ScanSettings};
use crate::core::naming::is_version_name;
use crate::core::version::VersionId;
use crate::core::{CoreError, CoreResult, FrameRange, ShotRef};

/// Directory between a layered department and its versions
pub const LAYERED_VERSION_DIR: &str = "version";

/// One image sequence inside a render layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPass {
    /// Base name without frame token or extension
    pub name: String,
    pub sequence: FrameSequence,
}

impl RenderPass {
    pub fn frame_range(&self) -> FrameRange {
        self.sequence.frame_range()
    }

    /// Full path with `#` padding (`/.../beauty.####.exr`)
    pub fn hiero_pattern(&self) -> PathBuf {
        self.sequence.directory.join(self.sequence.pattern())
    }

    /// Full path with printf padding (`/.../beauty.%04d.exr`)
    pub fn printf_pattern(&self) -> PathBuf {
        self.sequence.directory.join(self.sequence.printf_pattern())
    }
}

/// A render layer; only layers with at least one pass are reported
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingLayer {
    pub name: String,
    pub path: PathBuf,
    pub passes: Vec<RenderPass>,
}

impl LightingLayer {
    pub fn pass(&self, name: &str) -> Option<&RenderPass> {
        self.passes.iter().find(|p| p.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingVersion {
    pub version: VersionId,
    pub path: PathBuf,
    pub layers: Vec<LightingLayer>,
}

impl LightingVersion {
    pub fn layer(&self, name: &str) -> Option<&LightingLayer> {
        self.layers.iter().find(|l| l.name == name)
    }
}

/// Layered renders of one shot's department, versions ascending
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingScan {
    pub shot: ShotRef,
    pub department: String,
    pub versions: Vec<LightingVersion>,
}

impl LightingScan {
    pub fn latest_version(&self) -> Option<VersionId> {
        self.versions.last().map(|v| v.version)
    }

    pub fn version(&self, version: VersionId) -> Option<&LightingVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn has_data(&self) -> bool {
        !self.versions.is_empty()
    }
}

/// Reads layered department trees below the project root
pub struct LightingScanner {
    root: PathBuf,
    extensions: ScanSettings,
}

impl LightingScanner {
    pub fn new(root: impl Into<PathBuf>, extensions: ScanSettings) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(&config.project_root, config.scan.clone())
    }

    /// `{root}/{episode}/{sequence}/{shot}/{department}/version`
    pub fn version_root(&self, shot: &ShotRef, department: &str) -> PathBuf {
        self.root
            .join(&shot.episode)
            .join(&shot.sequence)
            .join(&shot.shot)
            .join(department)
            .join(LAYERED_VERSION_DIR)
    }

    /// Versions, layers and passes of one shot. A missing version root
    /// yields an empty scan; unreadable directories are skipped.
    pub async fn scan_shot(&self, shot: &ShotRef, department: &str) -> CoreResult<LightingScan> {
        let version_root = self.version_root(shot, department);
        let extensions = self.extensions.clone();
        let versions = tokio::task::spawn_blocking(move || scan_versions(&version_root, &extensions))
            .await
            .map_err(|e| CoreError::Internal(format!("Lighting scan task failed: {e}")))?;

        info!(
            shot = %shot,
            department,
            versions = versions.len(),
            "Scanned layered renders"
        );
        Ok(LightingScan {
            shot: shot.clone(),
            department: department.to_string(),
            versions,
        })
    }
}

/// Immediate children of `dir`, sorted by name
fn children(dir: &Path) -> Vec<walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping layered render entry: {}", e);
                None
            }
        })
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .collect()
}

fn scan_versions(version_root: &Path, extensions: &ScanSettings) -> Vec<LightingVersion> {
    if !version_root.is_dir() {
        debug!(path = %version_root.display(), "No layered version directory");
        return Vec::new();
    }

    let mut versions: Vec<LightingVersion> = children(version_root)
        .into_iter()
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?;
            if !is_version_name(name) {
                warn!(path = %entry.path().display(), "Not a version directory");
                return None;
            }
            let version = VersionId::parse(name).ok()?;
            let path = entry.into_path();
            let layers = scan_layers(&path, extensions);
            Some(LightingVersion {
                version,
                path,
                layers,
            })
        })
        .collect();
    versions.sort_by_key(|v| v.version);
    versions
}

fn scan_layers(version_dir: &Path, extensions: &ScanSettings) -> Vec<LightingLayer> {
    children(version_dir)
        .into_iter()
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let path = entry.into_path();
            let passes = scan_passes(&path, extensions);
            (!passes.is_empty()).then_some(LightingLayer { name, path, passes })
        })
        .collect()
}

fn scan_passes(layer_dir: &Path, extensions: &ScanSettings) -> Vec<RenderPass> {
    let files = children(layer_dir);
    let names = files
        .iter()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.file_name().to_str());

    detect_sequences(layer_dir, names, |ext| extensions.is_image(ext))
        .into_iter()
        .map(|sequence| RenderPass {
            name: sequence.base_name.clone(),
            sequence,
        })
        .collect()
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

    fn frames(dir: &Path, base: &str, range: std::ops::RangeInclusive<u64>) {
        for frame in range {
            touch(&dir.join(format!("{base}.{frame:04}.exr")));
        }
    }

    fn shot() -> ShotRef {
        ShotRef::new("Ep01", "sq0010", "SH0010")
    }

    fn scanner(dir: &TempDir) -> LightingScanner {
        LightingScanner::new(dir.path(), ScanSettings::default())
    }

    #[tokio::test]
    async fn test_versions_layers_and_passes() {
        let dir = TempDir::new().unwrap();
        let scanner = scanner(&dir);
        let root = scanner.version_root(&shot(), "lighting");

        frames(&root.join("v002/MASTER_ENV"), "beauty", 1001..=1010);
        frames(&root.join("v001/MASTER_CHAR_B"), "beauty", 1001..=1004);
        frames(&root.join("v001/MASTER_CHAR_A"), "beauty", 1001..=1005);
        frames(&root.join("v001/MASTER_CHAR_A"), "spec", 1001..=1003);
        touch(&root.join("v001/MASTER_CHAR_A/notes.txt"));
        fs::create_dir_all(root.join("v001/EMPTY_LAYER")).unwrap();
        fs::create_dir_all(root.join("wip")).unwrap();

        let scan = scanner.scan_shot(&shot(), "lighting").await.unwrap();
        assert!(scan.has_data());
        assert_eq!(scan.latest_version(), Some(VersionId::new(2)));
        assert_eq!(scan.versions.len(), 2);

        let v001 = scan.version(VersionId::new(1)).unwrap();
        let layers: Vec<&str> = v001.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(layers, vec!["MASTER_CHAR_A", "MASTER_CHAR_B"]);

        let char_a = v001.layer("MASTER_CHAR_A").unwrap();
        assert_eq!(char_a.passes.len(), 2);
        let beauty = char_a.pass("beauty").unwrap();
        assert_eq!(beauty.frame_range(), FrameRange::new(1001, 1005));
        assert_eq!(beauty.sequence.frame_count, 5);
        assert_eq!(
            beauty.hiero_pattern(),
            root.join("v001/MASTER_CHAR_A/beauty.####.exr")
        );
        assert_eq!(
            beauty.printf_pattern(),
            root.join("v001/MASTER_CHAR_A/beauty.%04d.exr")
        );
        assert_eq!(char_a.pass("spec").unwrap().sequence.last_frame, 1003);
    }

    #[tokio::test]
    async fn test_single_frame_and_gaps() {
        let dir = TempDir::new().unwrap();
        let scanner = scanner(&dir);
        let layer = scanner.version_root(&shot(), "lighting").join("v003/FG");
        touch(&layer.join("still.1001.exr"));
        touch(&layer.join("beauty.1001.exr"));
        touch(&layer.join("beauty.1003.exr"));

        let scan = scanner.scan_shot(&shot(), "lighting").await.unwrap();
        let fg = scan.versions[0].layer("FG").unwrap();
        assert_eq!(fg.pass("still").unwrap().sequence.frame_count, 1);
        assert_eq!(fg.pass("beauty").unwrap().sequence.missing_frames, vec![1002]);
    }

    #[tokio::test]
    async fn test_missing_version_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let scan = scanner(&dir).scan_shot(&shot(), "lighting").await.unwrap();
        assert!(!scan.has_data());
        assert_eq!(scan.latest_version(), None);
        assert_eq!(scan.department, "lighting");
    }
}
