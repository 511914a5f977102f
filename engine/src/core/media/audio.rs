//! Shot audio lookup

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::config::ProjectConfig;
use crate::core::{CoreError, CoreResult, ShotRef};

/// Outcome of an audio lookup; absence is a state, not an error
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AudioMatch {
    Matched {
        path: PathBuf,
        /// 1.0 when the sequence token also matched, 0.8 otherwise
        confidence: f32,
    },
    Missing,
}

impl AudioMatch {
    pub fn path(&self) -> Option<&Path> {
        match self {
            AudioMatch::Matched { path, .. } => Some(path),
            AudioMatch::Missing => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, AudioMatch::Matched { .. })
    }
}

/// Finds per-shot audio under the project's audio directory.
///
/// The directory is walked once and the file list kept until
/// [`AudioLocator::invalidate`].
pub struct AudioLocator {
    root: Option<PathBuf>,
    extensions: Vec<String>,
    index: RwLock<Option<Arc<Vec<PathBuf>>>>,
}

impl AudioLocator {
    pub fn new(root: Option<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root,
            extensions,
            index: RwLock::new(None),
        }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(config.audio_root(), config.scan.audio_extensions.clone())
    }

    /// Drops the cached file list
    pub async fn invalidate(&self) {
        *self.index.write().await = None;
    }

    async fn files(&self) -> CoreResult<Arc<Vec<PathBuf>>> {
        if let Some(files) = self.index.read().await.as_ref() {
            return Ok(Arc::clone(files));
        }

        let mut index = self.index.write().await;
        if let Some(files) = index.as_ref() {
            return Ok(Arc::clone(files));
        }

        let files = match self.root.clone() {
            Some(root) => {
                let extensions = self.extensions.clone();
                tokio::task::spawn_blocking(move || list_audio_files(&root, &extensions))
                    .await
                    .map_err(|e| CoreError::Internal(format!("Audio listing task failed: {e}")))?
            }
            None => Vec::new(),
        };
        info!(count = files.len(), "Indexed audio files");

        let files = Arc::new(files);
        *index = Some(Arc::clone(&files));
        Ok(files)
    }

    /// Audio whose file stem carries the shot's episode and shot tokens,
    /// preferring stems that also carry its sequence
    pub async fn locate(&self, shot: &ShotRef) -> CoreResult<AudioMatch> {
        let files = self.files().await?;

        let mut best: Option<(&PathBuf, f32)> = None;
        for path in files.iter() {
            let Some(confidence) = match_confidence(path, shot) else {
                continue;
            };
            if best.map_or(true, |(_, c)| confidence > c) {
                best = Some((path, confidence));
            }
        }

        Ok(match best {
            Some((path, confidence)) => AudioMatch::Matched {
                path: path.clone(),
                confidence,
            },
            None => {
                debug!(shot = %shot, "No audio found");
                AudioMatch::Missing
            }
        })
    }
}

fn list_audio_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if !root.is_dir() {
        debug!(root = %root.display(), "Audio directory missing");
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping audio entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
        })
        .collect();
    files.sort();
    files
}

fn match_confidence(path: &Path, shot: &ShotRef) -> Option<f32> {
    let stem = path.file_stem()?.to_str()?;
    let tokens: Vec<&str> = stem
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |name: &str| tokens.iter().any(|t| t.eq_ignore_ascii_case(name));

    if !has(&shot.episode) || !has(&shot.shot) {
        return None;
    }
    Some(if has(&shot.sequence) { 1.0 } else { 0.8 })
}
