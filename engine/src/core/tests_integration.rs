//! End-to-end tests over a temporary project tree
//!
//! Scan → cache → build, exercised the way a review session drives them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::core::cache::{CacheKey, UNIT_FILE_NAME};
use crate::core::config::ProjectConfig;
use crate::core::scanner::ProjectScanner;
use crate::core::timeline::{BuildWarningKind, TimelineBuilder, VersionPolicy};
use crate::core::version::{self, VersionId};

struct Project {
    dir: TempDir,
    config: Arc<ProjectConfig>,
}

impl Project {
    /// `Ep01/sq0010` holds SH0100, SH0010 and SH0020 with comp v001..v003;
    /// `Ep02/sq0010` holds one shot.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("show");

        for shot in ["SH0100", "SH0010", "SH0020"] {
            for version in ["v001", "v002", "v003"] {
                write_render(&root, "Ep01", "sq0010", shot, "comp", version);
            }
        }
        write_render(&root, "Ep02", "sq0010", "SH0010", "comp", "v001");
        let audio = root.join("audio/Ep01_sq0010_SH0010.wav");
        fs::create_dir_all(audio.parent().unwrap()).unwrap();
        fs::write(&audio, b"").unwrap();

        let config = ProjectConfig::from_json_str(&format!(
            r#"{{
                "project_name": "show",
                "project_root": {root},
                "media_paths": {{ "renders": "renders", "audio": "audio" }},
                "departments": ["comp", "lighting"],
                "naming_convention": {{
                    "episode_pattern": "Ep\\d{{2}}",
                    "sequence_pattern": "sq\\d{{4}}",
                    "shot_pattern": "SH\\d{{4}}[A-Z]?"
                }},
                "cache": {{ "cache_dir": {cache} }}
            }}"#,
            root = serde_json::to_string(&root).unwrap(),
            cache = serde_json::to_string(&dir.path().join("cache")).unwrap(),
        ))
        .unwrap();

        Self {
            dir,
            config: Arc::new(config),
        }
    }

    fn root(&self) -> &Path {
        &self.config.project_root
    }

    fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// A scanner with a fresh cache instance (same disk root), as after a
    /// process restart
    fn scanner(&self) -> ProjectScanner {
        ProjectScanner::from_config(Arc::clone(&self.config)).unwrap()
    }
}

fn write_render(root: &Path, ep: &str, seq: &str, shot: &str, dept: &str, version: &str) {
    let dir = root.join(ep).join(seq).join(shot).join(dept).join(version).join("renders");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{shot}_{dept}_{version}.mov")), b"").unwrap();
}

#[tokio::test]
async fn test_scan_and_build_with_each_policy() {
    let project = Project::new();
    let builder = TimelineBuilder::new(project.scanner());

    let latest = builder
        .build_timeline("Ep01", "sq0010", "comp", VersionPolicy::Latest)
        .await
        .unwrap();
    let order: Vec<&str> = latest.entries.iter().map(|e| e.shot.shot.as_str()).collect();
    assert_eq!(order, vec!["SH0010", "SH0020", "SH0100"]);
    assert!(latest.entries.iter().all(|e| e.version == VersionId::new(3)));
    assert!(latest.entries[0].audio.is_matched());
    assert!(!latest.entries[1].audio.is_matched());

    let exact = builder
        .build_timeline("Ep01", "sq0010", "comp", "specific: v002".parse().unwrap())
        .await
        .unwrap();
    assert!(exact.entries.iter().all(|e| e.version == VersionId::new(2)));

    let fallback = builder
        .build_timeline("Ep01", "sq0010", "comp", "specific: v005".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(fallback.entries.len(), 3);
    assert!(fallback.entries.iter().all(|e| e.version == VersionId::new(3)));
    assert!(fallback
        .warnings
        .iter()
        .any(|w| w.kind == BuildWarningKind::VersionFallback));

    // Same scan state and policy give the same output
    let again = builder
        .build_timeline("Ep01", "sq0010", "comp", VersionPolicy::Latest)
        .await
        .unwrap();
    assert_eq!(again, latest);
}

#[tokio::test]
async fn test_full_scan_feeds_builder_state() {
    let project = Project::new();
    let scanner = project.scanner();
    let scan = scanner.scan_full(None, false).await.unwrap();
    assert_eq!(scan.episode_ids(), vec!["Ep01", "Ep02"]);
    assert_eq!(scan.shot_count(), 4);
    assert!(scan.warnings.is_empty());

    let builder = TimelineBuilder::new(scanner);
    builder.set_scan_state(scan).await;
    let result = builder
        .build_timeline("Ep02", "sq0010", "comp", VersionPolicy::Latest)
        .await
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].version, VersionId::new(1));
}

#[tokio::test]
async fn test_disk_cache_survives_restart() {
    let project = Project::new();
    let first = project.scanner().scan_full(None, false).await.unwrap();
    assert_eq!(first.from_cache, 0);

    let restarted = project.scanner();
    let second = restarted.scan_full(None, false).await.unwrap();
    assert!(second.from_cache > 0);
    assert_eq!(second.episodes, first.episodes);
    assert!(restarted.cache().stats().disk_hits > 0);
}

#[tokio::test]
async fn test_concurrent_scans_walk_once() {
    let project = Project::new();
    let scanner = project.scanner();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let scanner = scanner.clone();
        tasks.push(tokio::spawn(async move { scanner.scan_episodes().await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), vec!["Ep01", "Ep02"]);
    }

    let stats = scanner.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.memory_hits, 7);
}

#[tokio::test]
async fn test_episode_prefix_invalidation_keeps_other_episodes() {
    let project = Project::new();
    let scanner = project.scanner();
    scanner.scan_full(None, false).await.unwrap();

    let cache = scanner.cache();
    let ep01_seq = CacheKey::from(["scan", "Ep01", "sq0010"]);
    let ep01_shot = CacheKey::from(["scan", "Ep01", "sq0010", "SH0010"]);
    let ep02_seq = CacheKey::from(["scan", "Ep02", "sq0010"]);
    assert!(cache.get_value(&ep01_seq).await.is_some());

    let removed = cache.invalidate_prefix(&CacheKey::from(["scan", "Ep01"])).await;
    assert_eq!(removed, 4);

    assert!(cache.get_value(&ep01_seq).await.is_none());
    assert!(cache.get_value(&ep01_shot).await.is_none());
    assert!(cache.get_value(&ep02_seq).await.is_some());
}

#[tokio::test]
async fn test_corrupt_unit_is_healed_on_read() {
    let project = Project::new();
    project.scanner().scan_episodes().await.unwrap();

    let unit = project.cache_root().join("episodes").join(UNIT_FILE_NAME);
    assert!(unit.is_file());
    fs::write(&unit, b"{ not json").unwrap();

    let scanner = project.scanner();
    assert_eq!(scanner.scan_episodes().await.unwrap(), vec!["Ep01", "Ep02"]);
    assert!(scanner.cache().stats().healed >= 1);
}

#[tokio::test]
async fn test_new_render_needs_refresh() {
    let project = Project::new();
    let builder = TimelineBuilder::new(project.scanner());
    builder
        .build_timeline("Ep01", "sq0010", "comp", VersionPolicy::Latest)
        .await
        .unwrap();

    write_render(project.root(), "Ep01", "sq0010", "SH0010", "comp", "v004");
    let scan = builder.refresh("Ep01", &[]).await.unwrap();
    let comp = scan
        .shot("Ep01", "sq0010", "SH0010")
        .and_then(|s| s.department("comp"))
        .unwrap();
    assert_eq!(version::latest_of(&comp.versions).unwrap(), VersionId::new(4));
    assert!(scan.shot("Ep02", "sq0010", "SH0010").is_none());
}
