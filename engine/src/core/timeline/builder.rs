//! Timeline Builder
//!
//! Resolves each shot of a sequence to one department version, inspects its
//! media and audio, and returns entries in shot-number order. Per-shot work
//! runs concurrently; ordering is applied once every shot is final.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{
    BuildOptions, BuildResult, BuildWarning, BuildWarningKind, ResolvedTimelineEntry, SkippedShot,
    TimelineRequest, TimelineUpdate, VersionPolicy, VersionStep,
};
use crate::core::config::{ProjectConfig, RENDERS_ROLE};
use crate::core::media::{
    AudioLocator, AudioMatch, FsMediaInspector, MediaDescriptor, MediaInspector,
    LAYERED_VERSION_DIR,
};
use crate::core::naming::{compare_shot_names, is_sub_shot, sort_sequence_names};
use crate::core::scanner::{ProjectScanner, ScanResult, ShotInfo};
use crate::core::{CoreError, CoreResult, SequenceName};

type Resolved = Result<(ResolvedTimelineEntry, Vec<BuildWarning>), SkippedShot>;

// =============================================================================
// Resolver
// =============================================================================

/// Per-entry resolution; cloned into concurrent tasks
#[derive(Clone)]
struct Resolver {
    config: Arc<ProjectConfig>,
    inspector: Arc<dyn MediaInspector>,
    audio: Arc<AudioLocator>,
}

impl Resolver {
    /// Configured spelling of a department, or the name as given
    fn department_name(&self, department: &str) -> String {
        self.config
            .find_department(department)
            .unwrap_or(department)
            .to_string()
    }

    async fn resolve(&self, shot: &ShotInfo, department: &str, policy: VersionPolicy) -> Resolved {
        let shot_ref = shot.shot_ref();

        let Some(dept) = shot.department(department) else {
            let error = CoreError::DepartmentNotRendered {
                shot: shot.full_name(),
                department: department.to_string(),
            };
            debug!(shot = %shot_ref, "{}", error);
            return Err(SkippedShot::from_error(&shot_ref, department, &error));
        };

        let Some(resolution) = policy.resolve(&dept.versions) else {
            let error = CoreError::NoVersionsAvailable {
                shot: shot.full_name(),
                department: department.to_string(),
            };
            debug!(shot = %shot_ref, "{}", error);
            return Err(SkippedShot::from_error(&shot_ref, department, &error));
        };

        let mut warnings = Vec::new();
        if let Some(reason) = resolution.fallback {
            warn!(shot = %shot_ref, department, "{}", reason);
            warnings.push(BuildWarning::for_shot(
                BuildWarningKind::VersionFallback,
                &shot_ref,
                reason,
            ));
        }

        let version_path = dept.version_path(resolution.version);
        let media = self.inspect_media(&version_path).await;
        if media.is_none() {
            warnings.push(BuildWarning::for_shot(
                BuildWarningKind::MediaMissing,
                &shot_ref,
                format!("no inspectable media under {}", version_path.display()),
            ));
        }

        let audio = match self.audio.locate(&shot_ref).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(shot = %shot_ref, "Audio lookup failed: {}", e);
                AudioMatch::Missing
            }
        };

        Ok((
            ResolvedTimelineEntry {
                shot: shot_ref,
                department: department.to_string(),
                version: resolution.version,
                policy,
                available_versions: dept.versions.clone(),
                version_path,
                media,
                audio,
                record_in: None,
                record_out: None,
            },
            warnings,
        ))
    }

    /// First role with usable media; the renders role is tried first.
    /// Layered versions fall back to their render layers.
    async fn inspect_media(&self, version_dir: &Path) -> Option<MediaDescriptor> {
        let preference = self.config.settings.media_preference;
        let mut roles: Vec<(&str, &str)> = self.config.version_media_roles().collect();
        roles.sort_by_key(|(role, _)| *role != RENDERS_ROLE);

        for (role, subpath) in roles {
            match self.inspector.inspect(&version_dir.join(subpath), preference).await {
                Ok(media) => return Some(media),
                Err(e) => debug!(role, "No media for role: {}", e),
            }
        }

        let layered = version_dir
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name.eq_ignore_ascii_case(LAYERED_VERSION_DIR));
        if layered {
            match self.inspector.inspect(version_dir, preference).await {
                Ok(media) => return Some(media),
                Err(e) => debug!("No layer media: {}", e),
            }
        }
        None
    }
}

async fn join_ordered<T: Send + 'static>(
    mut tasks: JoinSet<(usize, T)>,
    slots: &mut [Option<T>],
) -> CoreResult<()> {
    while let Some(joined) = tasks.join_next().await {
        let (idx, value) =
            joined.map_err(|e| CoreError::Internal(format!("Timeline task failed: {e}")))?;
        slots[idx] = Some(value);
    }
    Ok(())
}

fn empty_slots<T>(len: usize) -> Vec<Option<T>> {
    (0..len).map(|_| None).collect()
}

// =============================================================================
// Timeline Builder
// =============================================================================

/// Builds review timelines from scan state
pub struct TimelineBuilder {
    scanner: ProjectScanner,
    resolver: Resolver,
    options: BuildOptions,
    state: RwLock<Option<ScanResult>>,
}

impl TimelineBuilder {
    pub fn new(scanner: ProjectScanner) -> Self {
        let config = Arc::clone(scanner.config());
        let inspector: Arc<dyn MediaInspector> = Arc::new(FsMediaInspector::from_config(&config));
        let audio = Arc::new(AudioLocator::from_config(&config));

        Self {
            scanner,
            resolver: Resolver {
                config,
                inspector,
                audio,
            },
            options: BuildOptions::default(),
            state: RwLock::new(None),
        }
    }

    /// Replaces the media inspector
    pub fn with_inspector(mut self, inspector: Arc<dyn MediaInspector>) -> Self {
        self.resolver.inspector = inspector;
        self
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn scanner(&self) -> &ProjectScanner {
        &self.scanner
    }

    /// Snapshot of the scan state builds resolve against
    pub async fn scan_state(&self) -> Option<ScanResult> {
        self.state.read().await.clone()
    }

    /// Replaces the scan state, e.g. with a result from `scan_full`
    pub async fn set_scan_state(&self, scan: ScanResult) {
        *self.state.write().await = Some(scan);
    }

    /// Shots of one sequence from the scan state, scanning (through the
    /// cache) when the state does not hold the sequence yet
    async fn sequence_shots(
        &self,
        episode: &str,
        sequence: &str,
    ) -> CoreResult<(Vec<ShotInfo>, Vec<BuildWarning>)> {
        if let Some(state) = self.state.read().await.as_ref() {
            if state.has_sequence(episode, sequence) {
                return Ok((state.shots_in(episode, sequence).to_vec(), Vec::new()));
            }
        }

        let scan = self.scanner.scan_sequence(episode, sequence).await?;
        let warnings = scan
            .warnings
            .iter()
            .map(|w| BuildWarning::general(BuildWarningKind::Scan, w.to_string()))
            .collect();
        let shots = scan.shots.clone();

        let mut state = self.state.write().await;
        state
            .get_or_insert_with(|| ScanResult::new(&self.resolver.config.project_root))
            .insert_sequence(scan);
        Ok((shots, warnings))
    }

    /// Shots of every sequence the entries touch, indexed by shot name
    async fn indexed_shots(
        &self,
        entries: &[ResolvedTimelineEntry],
    ) -> CoreResult<HashMap<(String, String), HashMap<String, ShotInfo>>> {
        let mut index: HashMap<(String, String), HashMap<String, ShotInfo>> = HashMap::new();
        for entry in entries {
            let key = (entry.shot.episode.clone(), entry.shot.sequence.clone());
            if index.contains_key(&key) {
                continue;
            }
            let (shots, _) = self.sequence_shots(&key.0, &key.1).await?;
            let by_name = shots.into_iter().map(|s| (s.shot.clone(), s)).collect();
            index.insert(key, by_name);
        }
        Ok(index)
    }

    /// Records re-resolved versions as each department's current selection
    async fn record_selection(&self, entries: &[&ResolvedTimelineEntry]) {
        let mut state = self.state.write().await;
        let Some(state) = state.as_mut() else {
            return;
        };
        for entry in entries {
            if !state.select_version(&entry.shot, &entry.department, entry.version) {
                debug!(shot = %entry.shot, department = %entry.department, "Selection not in scan state");
            }
        }
    }

    fn default_duration(&self) -> u64 {
        self.resolver.config.settings.default_shot_duration
    }

    // =========================================================================
    // Builds
    // =========================================================================

    /// Resolves every shot of one sequence against `department`.
    ///
    /// Shots that cannot resolve are skipped with a reason; only scan
    /// failures abort the build.
    pub async fn build_timeline(
        &self,
        episode: &str,
        sequence: &str,
        department: &str,
        policy: VersionPolicy,
    ) -> CoreResult<BuildResult> {
        let department = self.resolver.department_name(department);
        let (mut shots, warnings) = self.sequence_shots(episode, sequence).await?;
        shots.sort_by(|a, b| compare_shot_names(&a.shot, &b.shot));

        let mut slots: Vec<Option<Resolved>> = empty_slots(shots.len());
        let mut tasks = JoinSet::new();
        for (idx, shot) in shots.into_iter().enumerate() {
            if is_sub_shot(&shot.shot) && !self.options.include_sub_shots {
                slots[idx] = Some(Err(SkippedShot::new(
                    &shot.shot_ref(),
                    &department,
                    "sub-shot excluded",
                )));
                continue;
            }

            let resolver = self.resolver.clone();
            let department = department.clone();
            tasks.spawn(async move { (idx, resolver.resolve(&shot, &department, policy).await) });
        }
        join_ordered(tasks, &mut slots).await?;

        let mut result = BuildResult::named(format!("{episode}_{sequence}_review"));
        result.warnings = warnings;
        for outcome in slots.into_iter().flatten() {
            match outcome {
                Ok((entry, warnings)) => {
                    result.entries.push(entry);
                    result.warnings.extend(warnings);
                }
                Err(skipped) => result.skipped.push(skipped),
            }
        }
        assign_positions(&mut result.entries, self.default_duration());

        info!(
            episode,
            sequence,
            department = %department,
            policy = %policy,
            entries = result.entries.len(),
            skipped = result.skipped.len(),
            "Built timeline"
        );
        Ok(result)
    }

    /// Concatenates several sequences of one episode in sequence order. An
    /// empty sequence list selects the whole episode.
    pub async fn build_sequences(&self, request: &TimelineRequest) -> CoreResult<BuildResult> {
        let department = match &request.department {
            Some(department) => department.clone(),
            None => self
                .resolver
                .config
                .primary_department()
                .map(str::to_string)
                .ok_or_else(|| {
                    CoreError::ConfigInvalid(vec!["no departments configured".to_string()])
                })?,
        };

        let available = self.scanner.scan_sequences(&request.episode).await?;
        let mut sequences = if request.sequences.is_empty() {
            available.clone()
        } else {
            request.sequences.clone()
        };
        sort_sequence_names(&mut sequences);
        sequences.dedup();

        let mut result = BuildResult::named(timeline_name(&request.episode, &sequences, &available));
        for sequence in &sequences {
            let built = self
                .build_timeline(&request.episode, sequence, &department, request.policy)
                .await?;
            result.extend(built);
        }
        assign_positions(&mut result.entries, self.default_duration());

        info!(
            timeline = %result.name,
            sequences = sequences.len(),
            entries = result.entries.len(),
            "Built multi-sequence timeline"
        );
        Ok(result)
    }

    // =========================================================================
    // Re-resolution
    // =========================================================================

    /// Re-resolves entries in place. `plan` picks each entry's department
    /// and policy, or returns a warning to leave the entry as it is.
    async fn re_resolve<F>(
        &self,
        name: &str,
        entries: &[ResolvedTimelineEntry],
        plan: F,
    ) -> CoreResult<BuildResult>
    where
        F: Fn(&ResolvedTimelineEntry, &ShotInfo) -> Result<(String, VersionPolicy), BuildWarning>,
    {
        let mut result = BuildResult::named(name);
        let mut slots: Vec<Option<Resolved>> = empty_slots(entries.len());
        let mut tasks = JoinSet::new();
        let index = self.indexed_shots(entries).await?;

        for (idx, entry) in entries.iter().enumerate() {
            let shot = index
                .get(&(entry.shot.episode.clone(), entry.shot.sequence.clone()))
                .and_then(|shots| shots.get(&entry.shot.shot))
                .cloned();
            let Some(shot) = shot else {
                slots[idx] = Some(Err(SkippedShot::new(
                    &entry.shot,
                    &entry.department,
                    "shot is no longer in the scan",
                )));
                continue;
            };

            match plan(entry, &shot) {
                Ok((department, policy)) => {
                    let resolver = self.resolver.clone();
                    tasks.spawn(async move {
                        (idx, resolver.resolve(&shot, &department, policy).await)
                    });
                }
                Err(warning) => result.warnings.push(warning),
            }
        }
        join_ordered(tasks, &mut slots).await?;

        let mut selected = Vec::new();
        for (entry, outcome) in entries.iter().zip(slots) {
            match outcome {
                Some(Ok((resolved, warnings))) => {
                    selected.push(result.entries.len());
                    result.entries.push(resolved);
                    result.warnings.extend(warnings);
                }
                Some(Err(skipped)) => {
                    result.entries.push(entry.clone());
                    result.skipped.push(skipped);
                }
                None => result.entries.push(entry.clone()),
            }
        }
        let selected: Vec<&ResolvedTimelineEntry> =
            selected.into_iter().map(|idx| &result.entries[idx]).collect();
        self.record_selection(&selected).await;

        assign_positions(&mut result.entries, self.default_duration());
        Ok(result)
    }

    /// Moves every entry to another department with its own policy.
    /// Entries that cannot resolve there stay unchanged and are reported.
    pub async fn switch_department(
        &self,
        name: &str,
        entries: &[ResolvedTimelineEntry],
        target: &str,
    ) -> CoreResult<BuildResult> {
        let target = self.resolver.department_name(target);
        let result = self
            .re_resolve(name, entries, |entry, _| Ok((target.clone(), entry.policy)))
            .await?;
        info!(department = %target, skipped = result.skipped.len(), "Switched department");
        Ok(result)
    }

    /// Re-resolves every entry with `policy` against the scan state held
    /// by the builder; the filesystem is not rescanned.
    pub async fn update_all_versions(
        &self,
        name: &str,
        entries: &[ResolvedTimelineEntry],
        policy: VersionPolicy,
    ) -> CoreResult<BuildResult> {
        let result = self
            .re_resolve(name, entries, |entry, _| Ok((entry.department.clone(), policy)))
            .await?;
        info!(policy = %policy, skipped = result.skipped.len(), "Updated versions");
        Ok(result)
    }

    /// Moves every entry one version up or down among the versions on disk,
    /// never below the project's first version
    pub async fn step_versions(
        &self,
        name: &str,
        entries: &[ResolvedTimelineEntry],
        step: VersionStep,
    ) -> CoreResult<BuildResult> {
        let settings = &self.resolver.config.settings;
        self.re_resolve(name, entries, |entry, shot| {
            let versions = shot
                .department(&entry.department)
                .map(|d| d.versions.as_slice())
                .unwrap_or_default();
            let stepped = step
                .apply(entry.version, versions)
                .filter(|v| settings.accepts_version(*v));
            match stepped {
                Some(version) => Ok((entry.department.clone(), VersionPolicy::Specific(version))),
                None => Err(BuildWarning::for_shot(
                    BuildWarningKind::StepBlocked,
                    &entry.shot,
                    format!("no {step:?} version after {}", entry.version).to_lowercase(),
                )),
            }
        })
        .await
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Drops cached scans and rescans. An empty `sequences` list refreshes
    /// the whole episode.
    pub async fn refresh(
        &self,
        episode: &str,
        sequences: &[SequenceName],
    ) -> CoreResult<ScanResult> {
        self.resolver.audio.invalidate().await;

        if sequences.is_empty() {
            let episodes = [episode.to_string()];
            let scan = self.scanner.scan_full(Some(&episodes[..]), true).await?;
            let mut state = self.state.write().await;
            match state.as_mut() {
                Some(current) => {
                    current.episodes.remove(episode);
                    current.merge(scan);
                }
                None => *state = Some(scan),
            }
        } else {
            for sequence in sequences {
                self.scanner.invalidate_sequence(episode, sequence).await;
                let scan = self.scanner.scan_sequence(episode, sequence).await?;
                let mut state = self.state.write().await;
                state
                    .get_or_insert_with(|| ScanResult::new(&self.resolver.config.project_root))
                    .insert_sequence(scan);
            }
        }

        info!(episode, sequences = sequences.len(), "Refreshed scan state");
        self.state
            .read()
            .await
            .clone()
            .ok_or_else(|| CoreError::Internal("scan state missing after refresh".to_string()))
    }
}

// =============================================================================
// Pure Helpers
// =============================================================================

/// `<ep>_all_review` when every sequence is selected, otherwise the
/// selected sequences joined: `<ep>_sq0010_sq0020_review`
pub fn timeline_name(episode: &str, selected: &[SequenceName], available: &[SequenceName]) -> String {
    let chosen: BTreeSet<&str> = selected.iter().map(String::as_str).collect();
    let all: BTreeSet<&str> = available.iter().map(String::as_str).collect();

    if !all.is_empty() && chosen == all {
        format!("{episode}_all_review")
    } else {
        format!("{episode}_{}_review", selected.join("_"))
    }
}

/// Lays entries end to end from frame 0; `record_out` is inclusive
pub fn assign_positions(entries: &mut [ResolvedTimelineEntry], default_duration: u64) {
    let mut cursor = 0;
    for entry in entries {
        let duration = entry.duration_or(default_duration).max(1);
        entry.record_in = Some(cursor);
        entry.record_out = Some(cursor + duration - 1);
        cursor += duration;
    }
}

/// Compares a timeline already on the host with a fresh build, by clip name
pub fn plan_update(
    existing: &[ResolvedTimelineEntry],
    fresh: &[ResolvedTimelineEntry],
) -> TimelineUpdate {
    let current: HashMap<String, &ResolvedTimelineEntry> =
        existing.iter().map(|e| (e.full_name(), e)).collect();

    let mut update = TimelineUpdate::default();
    for entry in fresh {
        let name = entry.full_name();
        match current.get(&name) {
            None => update.added.push(entry.clone()),
            Some(old) if old.version != entry.version || old.department != entry.department => {
                update.updated.push(entry.clone())
            }
            Some(_) => update.unchanged.push(name),
        }
    }
    update
}
