//! Project Scanner
//!
//! Walks `<root>/<episode>/<sequence>/<shot>/<department>/<version>/<role>`
//! and builds the shot/department/version hierarchy. Every level is served
//! through the two-tier cache; results with failed listings are returned
//! but never stored.

mod cancel;
mod listing;
mod models;

pub use cancel::CancellationToken;
pub use models::{
    DepartmentInfo, LevelListing, ScanResult, ScanState, ScanWarning, ScanWarningKind, SequenceScan,
    ShotInfo, ShotScan, StructureReport,
};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::core::cache::{CacheKey, CacheOptions, Computed, TwoTierCache};
use crate::core::config::ProjectConfig;
use crate::core::media::LAYERED_VERSION_DIR;
use crate::core::naming::{compare_shot_names, is_version_name, NamingPatterns};
use crate::core::version::VersionId;
use crate::core::{CoreError, CoreResult, EpisodeName, SequenceName, ShotName, ShotRef};

use models::any_degrading;

/// Progress callback: `(message, current, total)`
pub type ProgressCallback = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Depth below a role directory searched for a media file
const MEDIA_SEARCH_DEPTH: usize = 2;

// =============================================================================
// Cache Keys
// =============================================================================

const EPISODES_KEY: &str = "episodes";
const SEQUENCES_KEY: &str = "sequences";
const SHOTS_KEY: &str = "shots";
const SCAN_KEY: &str = "scan";

fn episodes_key() -> CacheKey {
    CacheKey::from([EPISODES_KEY])
}

fn sequences_key(episode: &str) -> CacheKey {
    CacheKey::from([SEQUENCES_KEY, episode])
}

fn shots_key(episode: &str, sequence: &str) -> CacheKey {
    CacheKey::from([SHOTS_KEY, episode, sequence])
}

fn sequence_scan_key(episode: &str, sequence: &str) -> CacheKey {
    CacheKey::from([SCAN_KEY, episode, sequence])
}

fn shot_scan_key(shot: &ShotRef) -> CacheKey {
    CacheKey::from([
        SCAN_KEY,
        shot.episode.as_str(),
        shot.sequence.as_str(),
        shot.shot.as_str(),
    ])
}

// =============================================================================
// Scan Context
// =============================================================================

/// Per-scan counters and cancellation, shared by every task of one scan
struct ScanContext {
    cancel: CancellationToken,
    visited: AtomicU64,
    from_cache: AtomicU64,
}

impl ScanContext {
    fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cancel,
            visited: AtomicU64::new(0),
            from_cache: AtomicU64::new(0),
        })
    }

    fn visit(&self, entries: u64) {
        self.visited.fetch_add(entries, Ordering::Relaxed);
    }

    fn record(&self, from_cache: bool) {
        if from_cache {
            self.from_cache.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Level {
    Sequence,
    Shot,
}

// =============================================================================
// Project Scanner
// =============================================================================

struct ScannerInner {
    config: Arc<ProjectConfig>,
    patterns: NamingPatterns,
    cache: Arc<TwoTierCache>,
    /// Bounds concurrent directory reads
    limiter: Semaphore,
    state: watch::Sender<ScanState>,
    progress: RwLock<Option<ProgressCallback>>,
}

/// Scans one project tree. Cheap to clone; clones share cache and state.
#[derive(Clone)]
pub struct ProjectScanner {
    inner: Arc<ScannerInner>,
}

impl ProjectScanner {
    pub fn new(config: Arc<ProjectConfig>, cache: Arc<TwoTierCache>) -> CoreResult<Self> {
        let patterns = NamingPatterns::compile(&config.naming_convention)?;
        let workers = config.scan.max_workers.max(1);
        let (state, _) = watch::channel(ScanState::Idle);

        Ok(Self {
            inner: Arc::new(ScannerInner {
                config,
                patterns,
                cache,
                limiter: Semaphore::new(workers),
                state,
                progress: RwLock::new(None),
            }),
        })
    }

    /// Scanner with the cache described by the project's cache settings
    pub fn from_config(config: Arc<ProjectConfig>) -> CoreResult<Self> {
        let cache = TwoTierCache::new(CacheOptions::from_config(&config))?;
        Self::new(config, Arc::new(cache))
    }

    /// Installs a progress callback, invoked once per scanned sequence
    pub fn with_progress(self, callback: ProgressCallback) -> Self {
        self.set_progress(Some(callback));
        self
    }

    pub fn set_progress(&self, callback: Option<ProgressCallback>) {
        let mut progress = self.inner.progress.write().unwrap_or_else(|e| e.into_inner());
        *progress = callback;
    }

    pub fn config(&self) -> &Arc<ProjectConfig> {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.inner.cache
    }

    /// Current lifecycle state
    pub fn state(&self) -> ScanState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.inner.state.subscribe()
    }

    fn set_state(&self, state: ScanState) {
        self.inner.state.send_replace(state);
    }

    fn report(&self, message: &str, current: usize, total: usize) {
        let callback = self
            .inner
            .progress
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(message, current, total);
        }
    }

    fn root(&self) -> &PathBuf {
        &self.inner.config.project_root
    }

    fn sequence_dir(&self, episode: &str, sequence: &str) -> PathBuf {
        self.root().join(episode).join(sequence)
    }

    async fn permit(&self) -> CoreResult<SemaphorePermit<'_>> {
        self.inner
            .limiter
            .acquire()
            .await
            .map_err(|_| CoreError::Internal("Scan limiter closed".to_string()))
    }

    fn matches(&self, level: Level, name: &str) -> bool {
        match level {
            Level::Sequence => self.inner.patterns.matches_sequence(name),
            Level::Shot => self.inner.patterns.matches_shot(name),
        }
    }

    // =========================================================================
    // Level Listings
    // =========================================================================

    async fn list_episodes(&self, ctx: &Arc<ScanContext>) -> CoreResult<LevelListing> {
        ctx.cancel.check()?;
        let key = episodes_key();
        let root = self.root().clone();

        let fetched = self
            .inner
            .cache
            .get_or_compute(&key, None, move || async move {
                let listing = {
                    let _permit = self.permit().await?;
                    listing::list_subdirs(&root).await
                };
                let listing = listing.map_err(|e| CoreError::ProjectRootUnreachable {
                    path: root.display().to_string(),
                    reason: e.to_string(),
                })?;
                ctx.visit(listing.visited);

                let warnings = broken_entries(listing.problems);
                let mut names = Vec::new();
                for name in listing.dirs {
                    if self.inner.patterns.matches_episode(&name) {
                        names.push(name);
                    } else {
                        debug!(name = %name, "Skipping non-episode directory");
                    }
                }
                names.sort_by(|a, b| compare_shot_names(a, b));

                Ok(Computed::cacheable(LevelListing { names, warnings }))
            })
            .await?;

        ctx.record(fetched.from_cache);
        Ok(fetched.value)
    }

    /// Lists sequence or shot names below `dir`. A failed listing yields no
    /// names and a degrading warning.
    async fn list_level(
        &self,
        ctx: &Arc<ScanContext>,
        key: CacheKey,
        dir: PathBuf,
        level: Level,
    ) -> CoreResult<LevelListing> {
        ctx.cancel.check()?;

        let fetched = self
            .inner
            .cache
            .get_or_compute(&key, None, move || async move {
                let listing = {
                    let _permit = self.permit().await?;
                    listing::list_subdirs(&dir).await
                };

                let listing = match listing {
                    Ok(listing) => listing,
                    Err(e) => {
                        warn!(path = %dir.display(), "Directory listing failed: {}", e);
                        return Ok(Computed::uncacheable(LevelListing {
                            names: Vec::new(),
                            warnings: vec![ScanWarning::listing_failed(&dir, e.to_string())],
                        }));
                    }
                };
                ctx.visit(listing.visited);

                let mut warnings = broken_entries(listing.problems);
                let mut names = Vec::new();
                for name in listing.dirs {
                    if self.matches(level, &name) {
                        names.push(name);
                    } else {
                        warnings.push(ScanWarning::new(
                            ScanWarningKind::UnparsableName,
                            dir.join(&name),
                            format!("'{name}' does not match the {level:?} pattern"),
                        ));
                    }
                }
                names.sort_by(|a, b| compare_shot_names(a, b));

                Ok(Computed {
                    cacheable: !any_degrading(&warnings),
                    value: LevelListing { names, warnings },
                })
            })
            .await?;

        ctx.record(fetched.from_cache);
        Ok(fetched.value)
    }

    /// Episode ids under the project root, in numeric order
    pub async fn scan_episodes(&self) -> CoreResult<Vec<EpisodeName>> {
        let ctx = ScanContext::new(CancellationToken::new());
        Ok(self.list_episodes(&ctx).await?.names)
    }

    /// Sequence ids of an episode, in numeric order
    pub async fn scan_sequences(&self, episode: &str) -> CoreResult<Vec<SequenceName>> {
        let ctx = ScanContext::new(CancellationToken::new());
        let listing = self
            .list_level(
                &ctx,
                sequences_key(episode),
                self.root().join(episode),
                Level::Sequence,
            )
            .await?;
        log_warnings(&listing.warnings);
        Ok(listing.names)
    }

    /// Shot ids of a sequence, in numeric order (sub-shots after their base)
    pub async fn scan_shots(&self, episode: &str, sequence: &str) -> CoreResult<Vec<ShotName>> {
        let ctx = ScanContext::new(CancellationToken::new());
        let listing = self
            .list_level(
                &ctx,
                shots_key(episode, sequence),
                self.sequence_dir(episode, sequence),
                Level::Shot,
            )
            .await?;
        log_warnings(&listing.warnings);
        Ok(listing.names)
    }

    // =========================================================================
    // Shot Scans
    // =========================================================================

    /// Departments and versions of one shot
    pub async fn scan_shot(&self, episode: &str, sequence: &str, shot: &str) -> CoreResult<ShotScan> {
        let ctx = ScanContext::new(CancellationToken::new());
        self.scan_shot_with(&ctx, &ShotRef::new(episode, sequence, shot))
            .await
    }

    async fn scan_shot_with(&self, ctx: &Arc<ScanContext>, shot: &ShotRef) -> CoreResult<ShotScan> {
        ctx.cancel.check()?;
        let fetched = self
            .inner
            .cache
            .get_or_compute(&shot_scan_key(shot), None, move || self.walk_shot(ctx, shot))
            .await?;
        ctx.record(fetched.from_cache);
        Ok(fetched.value)
    }

    async fn walk_shot(&self, ctx: &ScanContext, shot: &ShotRef) -> CoreResult<Computed<ShotScan>> {
        let shot_dir = self.sequence_dir(&shot.episode, &shot.sequence).join(&shot.shot);
        let mut info = ShotInfo::new(shot, &shot_dir);
        let mut warnings = Vec::new();

        ctx.cancel.check()?;
        let listing = {
            let _permit = self.permit().await?;
            listing::list_subdirs(&shot_dir).await
        };
        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => {
                warn!(shot = %shot, "Shot directory listing failed: {}", e);
                warnings.push(ScanWarning::listing_failed(&shot_dir, e.to_string()));
                return Ok(Computed::uncacheable(ShotScan { shot: info, warnings }));
            }
        };
        ctx.visit(listing.visited);
        warnings.extend(broken_entries(listing.problems));

        for department in &self.inner.config.departments {
            let Some(dir_name) = listing
                .dirs
                .iter()
                .find(|d| d.eq_ignore_ascii_case(department))
            else {
                continue;
            };

            let dept_dir = shot_dir.join(dir_name);
            if let Some(dept) = self
                .walk_department(ctx, department, dept_dir, &mut warnings)
                .await?
            {
                info.departments.insert(department.clone(), dept);
            }
        }

        for name in &listing.dirs {
            if self.inner.config.find_department(name).is_none() {
                debug!(shot = %shot, name = %name, "Ignoring unconfigured department directory");
            }
        }

        let cacheable = !any_degrading(&warnings);
        Ok(Computed {
            value: ShotScan { shot: info, warnings },
            cacheable,
        })
    }

    /// Versions of one department that hold media. `None` when the
    /// department directory could not be listed.
    ///
    /// Layered departments keep their versions below a `version` directory
    /// with one subdirectory per render layer; those versions count as
    /// rendered when any layer holds a file.
    async fn walk_department(
        &self,
        ctx: &ScanContext,
        department: &str,
        dept_dir: PathBuf,
        warnings: &mut Vec<ScanWarning>,
    ) -> CoreResult<Option<DepartmentInfo>> {
        let Some(mut names) = self.list_versions_dir(ctx, &dept_dir, warnings).await? else {
            return Ok(None);
        };

        let layered = names
            .iter()
            .find(|d| d.eq_ignore_ascii_case(LAYERED_VERSION_DIR))
            .filter(|_| !names.iter().any(|d| is_version_name(d)))
            .cloned();
        let is_layered = layered.is_some();
        let version_root = match layered {
            Some(name) => {
                let root = dept_dir.join(name);
                match self.list_versions_dir(ctx, &root, warnings).await? {
                    Some(inner) => names = inner,
                    None => return Ok(None),
                }
                root
            }
            None => dept_dir,
        };

        let candidates = self.version_candidates(&version_root, names, warnings);

        let mut versions = Vec::new();
        for version in candidates {
            let version_dir = version_root.join(version.to_string());
            let rendered = if is_layered {
                self.has_layer_media(ctx, &version_dir, warnings).await?
            } else {
                self.has_media(ctx, &version_dir, warnings).await?
            };
            if rendered {
                versions.push(version);
            } else {
                debug!(path = %version_dir.display(), "Version has no media");
            }
        }

        Ok(Some(DepartmentInfo::new(department, version_root, versions)))
    }

    /// Parses version directory names. Of two spellings of one number the
    /// configured padding wins, otherwise the first in name order.
    fn version_candidates(
        &self,
        dept_dir: &Path,
        names: Vec<String>,
        warnings: &mut Vec<ScanWarning>,
    ) -> Vec<VersionId> {
        let padding = self.inner.config.settings.version_padding;
        let mut by_number: BTreeMap<u32, VersionId> = BTreeMap::new();

        for name in names {
            let parsed = if is_version_name(&name) {
                VersionId::parse(&name).ok()
            } else {
                None
            };
            let Some(version) = parsed else {
                warnings.push(ScanWarning::new(
                    ScanWarningKind::UnparsableName,
                    dept_dir.join(&name),
                    format!("'{name}' is not a version directory"),
                ));
                continue;
            };

            match by_number.get(&version.number()) {
                None => {
                    by_number.insert(version.number(), version);
                }
                Some(existing) => {
                    warnings.push(ScanWarning::new(
                        ScanWarningKind::AmbiguousVersion,
                        dept_dir.join(&name),
                        format!("'{name}' duplicates {existing}"),
                    ));
                    if existing.width() != padding && version.width() == padding {
                        by_number.insert(version.number(), version);
                    }
                }
            }
        }

        by_number.into_values().collect()
    }

    /// Subdirectory names of a department or version root. `None` when the
    /// directory could not be listed.
    async fn list_versions_dir(
        &self,
        ctx: &ScanContext,
        dir: &Path,
        warnings: &mut Vec<ScanWarning>,
    ) -> CoreResult<Option<Vec<String>>> {
        ctx.cancel.check()?;
        let listing = {
            let _permit = self.permit().await?;
            listing::list_subdirs(dir).await
        };
        match listing {
            Ok(listing) => {
                ctx.visit(listing.visited);
                warnings.extend(broken_entries(listing.problems));
                Ok(Some(listing.dirs))
            }
            Err(e) => {
                warn!(path = %dir.display(), "Department listing failed: {}", e);
                warnings.push(ScanWarning::listing_failed(dir, e.to_string()));
                Ok(None)
            }
        }
    }

    /// Whether any render layer of a layered version holds a file
    async fn has_layer_media(
        &self,
        ctx: &ScanContext,
        version_dir: &Path,
        warnings: &mut Vec<ScanWarning>,
    ) -> CoreResult<bool> {
        ctx.cancel.check()?;
        let found = {
            let _permit = self.permit().await?;
            listing::contains_file(version_dir, MEDIA_SEARCH_DEPTH).await
        };
        match found {
            Ok((found, visited)) => {
                ctx.visit(visited);
                Ok(found)
            }
            Err(e) => {
                warn!(path = %version_dir.display(), "Layer listing failed: {}", e);
                warnings.push(ScanWarning::listing_failed(version_dir, e.to_string()));
                Ok(false)
            }
        }
    }

    /// Whether any non-audio media role of a version holds a file
    async fn has_media(
        &self,
        ctx: &ScanContext,
        version_dir: &Path,
        warnings: &mut Vec<ScanWarning>,
    ) -> CoreResult<bool> {
        for (role, subpath) in self.inner.config.version_media_roles() {
            ctx.cancel.check()?;
            let role_dir = version_dir.join(subpath);
            let found = {
                let _permit = self.permit().await?;
                listing::contains_file(&role_dir, MEDIA_SEARCH_DEPTH).await
            };
            match found {
                Ok((found, visited)) => {
                    ctx.visit(visited);
                    if found {
                        return Ok(true);
                    }
                }
                Err(e) => {
                    warn!(path = %role_dir.display(), role, "Media listing failed: {}", e);
                    warnings.push(ScanWarning::listing_failed(&role_dir, e.to_string()));
                }
            }
        }
        Ok(false)
    }

    // =========================================================================
    // Sequence Scans
    // =========================================================================

    /// All shots of one sequence, scanned concurrently
    pub async fn scan_sequence(&self, episode: &str, sequence: &str) -> CoreResult<SequenceScan> {
        let ctx = ScanContext::new(CancellationToken::new());
        self.scan_sequence_with(&ctx, episode, sequence).await
    }

    async fn scan_sequence_with(
        &self,
        ctx: &Arc<ScanContext>,
        episode: &str,
        sequence: &str,
    ) -> CoreResult<SequenceScan> {
        ctx.cancel.check()?;
        let key = sequence_scan_key(episode, sequence);

        let fetched = self
            .inner
            .cache
            .get_or_compute(&key, None, move || async move {
                let shots = self
                    .list_level(
                        ctx,
                        shots_key(episode, sequence),
                        self.sequence_dir(episode, sequence),
                        Level::Shot,
                    )
                    .await?;
                let mut warnings = shots.warnings;

                let mut tasks = JoinSet::new();
                for name in shots.names {
                    let scanner = self.clone();
                    let ctx = Arc::clone(ctx);
                    let shot = ShotRef::new(episode, sequence, name);
                    tasks.spawn(async move { scanner.scan_shot_with(&ctx, &shot).await });
                }

                let mut scans = Vec::with_capacity(tasks.len());
                while let Some(joined) = tasks.join_next().await {
                    let scan = joined
                        .map_err(|e| CoreError::Internal(format!("Shot scan task failed: {e}")))??;
                    scans.push(scan);
                }
                // A cancelled sequence is never stored, even when every shot finished
                ctx.cancel.check()?;

                scans.sort_by(|a, b| compare_shot_names(&a.shot.shot, &b.shot.shot));
                let mut shots = Vec::with_capacity(scans.len());
                for scan in scans {
                    warnings.extend(scan.warnings);
                    shots.push(scan.shot);
                }

                let cacheable = !any_degrading(&warnings);
                Ok(Computed {
                    value: SequenceScan {
                        episode: episode.to_string(),
                        sequence: sequence.to_string(),
                        shots,
                        warnings,
                    },
                    cacheable,
                })
            })
            .await?;

        ctx.record(fetched.from_cache);
        Ok(fetched.value)
    }

    // =========================================================================
    // Full Scans
    // =========================================================================

    /// Scans every episode, or only `episodes`. `force_refresh` drops the
    /// cached entries of the scanned scope first.
    pub async fn scan_full(
        &self,
        episodes: Option<&[EpisodeName]>,
        force_refresh: bool,
    ) -> CoreResult<ScanResult> {
        self.scan_full_with(episodes, force_refresh, &CancellationToken::new())
            .await
    }

    /// [`Self::scan_full`] with cooperative cancellation
    pub async fn scan_full_with(
        &self,
        episodes: Option<&[EpisodeName]>,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> CoreResult<ScanResult> {
        self.set_state(ScanState::Scanning);
        let result = self.run_full_scan(episodes, force_refresh, cancel).await;

        match &result {
            Ok(scan) => {
                info!(
                    scan_id = %scan.scan_id,
                    shots = scan.shot_count(),
                    visited = scan.entries_visited,
                    cached = scan.from_cache,
                    warnings = scan.warnings.len(),
                    "Scan completed in {}ms",
                    scan.duration_ms
                );
                self.set_state(ScanState::Completed);
            }
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.set_state(ScanState::Failed(e.to_string()));
            }
        }
        result
    }

    async fn run_full_scan(
        &self,
        episodes: Option<&[EpisodeName]>,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> CoreResult<ScanResult> {
        let started = Instant::now();
        let root = self.root().clone();

        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CoreError::ProjectRootUnreachable {
                    path: root.display().to_string(),
                    reason: "not a directory".to_string(),
                })
            }
            Err(e) => {
                return Err(CoreError::ProjectRootUnreachable {
                    path: root.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }

        if force_refresh {
            match episodes {
                Some(list) => {
                    self.inner.cache.invalidate(&episodes_key()).await;
                    for episode in list {
                        self.invalidate_episode(episode).await;
                    }
                }
                None => self.invalidate_all().await?,
            }
        }

        let ctx = ScanContext::new(cancel.clone());
        let mut warnings = Vec::new();

        let episode_ids = match episodes {
            Some(list) => list.to_vec(),
            None => {
                let listing = self.list_episodes(&ctx).await?;
                warnings.extend(listing.warnings);
                listing.names
            }
        };
        info!(root = %root.display(), episodes = episode_ids.len(), "Scanning project");

        let mut tree: HashMap<EpisodeName, BTreeMap<SequenceName, Vec<ShotInfo>>> = HashMap::new();
        let mut pairs = Vec::new();
        for episode in &episode_ids {
            let listing = self
                .list_level(
                    &ctx,
                    sequences_key(episode),
                    root.join(episode),
                    Level::Sequence,
                )
                .await?;
            warnings.extend(listing.warnings);
            tree.entry(episode.clone()).or_default();
            pairs.extend(listing.names.into_iter().map(|seq| (episode.clone(), seq)));
        }

        let total = pairs.len();
        self.report("Scanning sequences", 0, total);

        let mut tasks = JoinSet::new();
        for (episode, sequence) in pairs {
            let scanner = self.clone();
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move { scanner.scan_sequence_with(&ctx, &episode, &sequence).await });
        }

        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            let scan = joined
                .map_err(|e| CoreError::Internal(format!("Sequence scan task failed: {e}")))??;
            done += 1;
            self.report(
                &format!("Scanned {}/{}", scan.episode, scan.sequence),
                done,
                total,
            );

            warnings.extend(scan.warnings);
            tree.entry(scan.episode)
                .or_default()
                .insert(scan.sequence, scan.shots);
        }
        ctx.cancel.check()?;

        Ok(ScanResult {
            scan_id: Ulid::new().to_string(),
            scanned_at: Utc::now(),
            root,
            episodes: tree,
            entries_visited: ctx.visited.load(Ordering::Relaxed),
            from_cache: ctx.from_cache.load(Ordering::Relaxed),
            duration_ms: started.elapsed().as_millis() as u64,
            warnings,
        })
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Drops every cached entry under one episode
    pub async fn invalidate_episode(&self, episode: &str) {
        let cache = &self.inner.cache;
        cache.invalidate(&sequences_key(episode)).await;
        let removed = cache.invalidate_prefix(&CacheKey::from([SHOTS_KEY, episode])).await
            + cache.invalidate_prefix(&CacheKey::from([SCAN_KEY, episode])).await;
        debug!(episode, removed, "Invalidated episode");
    }

    /// Drops the cached entries of one sequence and its shots
    pub async fn invalidate_sequence(&self, episode: &str, sequence: &str) {
        let cache = &self.inner.cache;
        cache.invalidate(&shots_key(episode, sequence)).await;
        let removed = cache
            .invalidate_prefix(&sequence_scan_key(episode, sequence))
            .await;
        debug!(episode, sequence, removed, "Invalidated sequence");
    }

    /// Clears the whole scan cache
    pub async fn invalidate_all(&self) -> CoreResult<()> {
        self.inner.cache.clear().await
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Full scan summarized with structural gaps and scan warnings
    pub async fn validate_structure(&self) -> CoreResult<StructureReport> {
        let scan = self.scan_full(None, false).await?;
        let mut report = StructureReport {
            episodes: scan.episodes.len(),
            warnings: scan.warnings.clone(),
            ..Default::default()
        };

        if scan.episodes.is_empty() {
            report.warnings.push(ScanWarning::new(
                ScanWarningKind::StructureGap,
                &scan.root,
                "no episode directories found",
            ));
        }

        for episode in scan.episode_ids() {
            let sequences = &scan.episodes[&episode];
            report.sequences += sequences.len();
            if sequences.is_empty() {
                report.warnings.push(ScanWarning::new(
                    ScanWarningKind::StructureGap,
                    scan.root.join(&episode),
                    "episode has no sequences",
                ));
            }

            for sequence in scan.sequence_ids(&episode) {
                let shots = scan.shots_in(&episode, &sequence);
                report.shots += shots.len();
                if shots.is_empty() {
                    report.warnings.push(ScanWarning::new(
                        ScanWarningKind::StructureGap,
                        scan.root.join(&episode).join(&sequence),
                        "sequence has no shots",
                    ));
                }
                for shot in shots {
                    if shot.rendered_departments().next().is_none() {
                        report.warnings.push(ScanWarning::new(
                            ScanWarningKind::StructureGap,
                            &shot.path,
                            "shot has no rendered versions",
                        ));
                    }
                }
            }
        }

        Ok(report)
    }
}

fn broken_entries(problems: Vec<(PathBuf, String)>) -> Vec<ScanWarning> {
    problems
        .into_iter()
        .map(|(path, message)| ScanWarning::new(ScanWarningKind::BrokenEntry, path, message))
        .collect()
}

fn log_warnings(warnings: &[ScanWarning]) {
    for warning in warnings {
        warn!("{}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn render(root: &Path, shot: &str, dept: &str, version: &str) {
        touch(&root.join(format!(
            "Ep01/sq0010/{shot}/{dept}/{version}/renders/{shot}_{dept}_{version}.mov"
        )));
    }

    fn setup() -> (TempDir, ProjectScanner) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(&root).unwrap();

        let mut config = ProjectConfig::new("test", &root);
        config.cache.cache_dir = Some(dir.path().join("cache"));
        config.normalize();

        let scanner = ProjectScanner::from_config(Arc::new(config)).unwrap();
        (dir, scanner)
    }

    fn root(dir: &TempDir) -> PathBuf {
        dir.path().join("project")
    }

    #[tokio::test]
    async fn test_levels_are_numerically_ordered() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        for shot in ["SH0100", "SH0010", "SH0020", "SH0010A"] {
            render(&root, shot, "comp", "v001");
        }
        fs::create_dir_all(root.join("Ep02/sq0020")).unwrap();
        fs::create_dir_all(root.join("editorial")).unwrap();

        assert_eq!(scanner.scan_episodes().await.unwrap(), vec!["Ep01", "Ep02"]);
        assert_eq!(scanner.scan_sequences("Ep01").await.unwrap(), vec!["sq0010"]);
        assert_eq!(
            scanner.scan_shots("Ep01", "sq0010").await.unwrap(),
            vec!["SH0010", "SH0010A", "SH0020", "SH0100"]
        );
    }

    #[tokio::test]
    async fn test_shot_scan_collects_versions_with_media() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        render(&root, "SH0010", "comp", "v001");
        render(&root, "SH0010", "comp", "v003");
        fs::create_dir_all(root.join("Ep01/sq0010/SH0010/comp/v002/renders")).unwrap();
        fs::create_dir_all(root.join("Ep01/sq0010/SH0010/comp/wip")).unwrap();
        fs::create_dir_all(root.join("Ep01/sq0010/SH0010/fx")).unwrap();

        let scan = scanner.scan_shot("Ep01", "sq0010", "SH0010").await.unwrap();
        let comp = scan.shot.department("comp").unwrap();
        assert_eq!(comp.versions, vec![VersionId::new(1), VersionId::new(3)]);
        assert_eq!(comp.current, Some(VersionId::new(3)));

        let fx = scan.shot.department("fx").unwrap();
        assert!(fx.is_empty());
        assert!(scan.shot.department("lighting").is_none());

        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(scan.warnings[0].kind, ScanWarningKind::UnparsableName);
    }

    #[tokio::test]
    async fn test_layered_lighting_versions() {
        let (dir, scanner) = setup();
        let shot_dir = root(&dir).join("Ep01/sq0010/SH0010");
        touch(&shot_dir.join("lighting/version/v001/MASTER_CHAR_A/beauty.1001.exr"));
        touch(&shot_dir.join("lighting/version/v002/MASTER_ENV/beauty.1001.exr"));
        fs::create_dir_all(shot_dir.join("lighting/version/v003/MASTER_ENV")).unwrap();

        let scan = scanner.scan_shot("Ep01", "sq0010", "SH0010").await.unwrap();
        let lighting = scan.shot.department("lighting").unwrap();
        assert_eq!(lighting.versions, vec![VersionId::new(1), VersionId::new(2)]);
        assert_eq!(lighting.path, shot_dir.join("lighting/version"));
        assert_eq!(
            lighting.version_path(VersionId::new(2)),
            shot_dir.join("lighting/version/v002")
        );
        assert!(scan.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_versions_prefer_configured_padding() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        render(&root, "SH0010", "comp", "v02");
        render(&root, "SH0010", "comp", "v002");

        let scan = scanner.scan_shot("Ep01", "sq0010", "SH0010").await.unwrap();
        let comp = scan.shot.department("comp").unwrap();
        assert_eq!(comp.versions.len(), 1);
        assert_eq!(comp.versions[0].width(), 3);
        assert!(scan
            .warnings
            .iter()
            .any(|w| w.kind == ScanWarningKind::AmbiguousVersion));
    }

    #[tokio::test]
    async fn test_full_scan_then_cached_rescan() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        render(&root, "SH0020", "comp", "v001");
        render(&root, "SH0010", "comp", "v002");

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);
        let scanner = scanner.with_progress(Arc::new(move |_msg: &str, current: usize, total: usize| {
            seen.lock().unwrap().push((current, total));
        }));

        let first = scanner.scan_full(None, false).await.unwrap();
        assert_eq!(first.shot_count(), 2);
        assert_eq!(first.from_cache, 0);
        let shots: Vec<&str> = first
            .shots_in("Ep01", "sq0010")
            .iter()
            .map(|s| s.shot.as_str())
            .collect();
        assert_eq!(shots, vec!["SH0010", "SH0020"]);
        assert_eq!(scanner.state(), ScanState::Completed);
        assert_eq!(progress.lock().unwrap().last(), Some(&(1, 1)));

        let second = scanner.scan_full(None, false).await.unwrap();
        assert!(second.from_cache > 0);
        assert_eq!(second.episodes, first.episodes);
        assert_ne!(second.scan_id, first.scan_id);
    }

    #[tokio::test]
    async fn test_cached_scan_ignores_disk_until_invalidated() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        render(&root, "SH0010", "comp", "v001");

        scanner.scan_full(None, false).await.unwrap();
        render(&root, "SH0010", "comp", "v002");

        let stale = scanner.scan_full(None, false).await.unwrap();
        let comp = stale.shot("Ep01", "sq0010", "SH0010").unwrap().department("comp").unwrap();
        assert_eq!(comp.latest(), Some(VersionId::new(1)));

        let fresh = scanner.scan_full(None, true).await.unwrap();
        let comp = fresh.shot("Ep01", "sq0010", "SH0010").unwrap().department("comp").unwrap();
        assert_eq!(comp.latest(), Some(VersionId::new(2)));
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = ProjectConfig::new("test", dir.path().join("absent"));
        config.cache.enabled = false;
        let scanner = ProjectScanner::from_config(Arc::new(config)).unwrap();

        let err = scanner.scan_full(None, false).await.unwrap_err();
        assert!(matches!(err, CoreError::ProjectRootUnreachable { .. }));
        assert!(matches!(scanner.state(), ScanState::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_scan_fails_without_caching_sequence() {
        let (dir, scanner) = setup();
        render(&root(&dir), "SH0010", "comp", "v001");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scanner.scan_full_with(None, false, &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::ScanCancelled));

        let cached = scanner
            .cache()
            .get_value(&sequence_scan_key("Ep01", "sq0010"))
            .await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_scan_keeps_only_complete_entries() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        render(&root, "SH0010", "comp", "v001");
        render(&root, "SH0020", "comp", "v002");
        touch(&root.join("Ep01/sq0020/SH0010/comp/v001/renders/SH0010_comp_v001.mov"));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let scanner = scanner.with_progress(Arc::new(move |_msg: &str, current: usize, _total: usize| {
            if current >= 1 {
                trigger.cancel();
            }
        }));

        // Hold sq0020 in flight until the first sequence has finished and
        // cancelled the scan
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let blocker = {
            let cache = Arc::clone(scanner.cache());
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&sequence_scan_key("Ep01", "sq0020"), None, move || async move {
                        let _ = started_tx.send(());
                        while !cancel.is_cancelled() {
                            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        }
                        Ok(Computed::uncacheable(()))
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let err = scanner.scan_full_with(None, false, &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::ScanCancelled));
        assert!(matches!(scanner.state(), ScanState::Failed(_)));
        blocker.await.unwrap().unwrap();

        let cache = scanner.cache();
        assert!(cache.get_value(&sequence_scan_key("Ep01", "sq0020")).await.is_none());
        let unfinished = ShotRef::new("Ep01", "sq0020", "SH0010");
        assert!(cache.get_value(&shot_scan_key(&unfinished)).await.is_none());

        // Whatever finished before the cancel was stored whole
        let done: SequenceScan = cache
            .get(&sequence_scan_key("Ep01", "sq0010"))
            .await
            .unwrap();
        assert_eq!(done.shots.len(), 2);
        for name in ["SH0010", "SH0020"] {
            let shot = ShotRef::new("Ep01", "sq0010", name);
            let scan: ShotScan = cache.get(&shot_scan_key(&shot)).await.unwrap();
            assert!(scan.shot.department("comp").unwrap().latest().is_some());
        }
    }

    #[tokio::test]
    async fn test_validate_structure_reports_gaps() {
        let (dir, scanner) = setup();
        let root = root(&dir);
        render(&root, "SH0010", "comp", "v001");
        fs::create_dir_all(root.join("Ep01/sq0010/SH0020")).unwrap();
        fs::create_dir_all(root.join("Ep01/sq0020")).unwrap();

        let report = scanner.validate_structure().await.unwrap();
        assert_eq!(report.episodes, 1);
        assert_eq!(report.sequences, 2);
        assert_eq!(report.shots, 2);
        assert!(!report.is_valid());
        let gaps = report
            .warnings
            .iter()
            .filter(|w| w.kind == ScanWarningKind::StructureGap)
            .count();
        assert_eq!(gaps, 2);
    }
}
