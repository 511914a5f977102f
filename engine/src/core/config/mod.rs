//! Project Configuration
//!
//! Loads and validates the per-project schema: media roles, departments and
//! naming patterns, plus optional cache/scan/settings sections with defaults.
//!
//! Stored project configs live in `{config_dir}/shotline/projects/<name>.json`.

use std::collections::BTreeMap;
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::fs::{atomic_write_json_pretty, validate_path_component};
use crate::core::media::MediaPreference;
use crate::core::version::{self, VersionId, DEFAULT_FIRST_VERSION, DEFAULT_VERSION_WIDTH};
use crate::core::{CoreError, CoreResult};

/// Media role every project must declare
pub const RENDERS_ROLE: &str = "renders";

/// Optional media role holding per-shot audio files
pub const AUDIO_ROLE: &str = "audio";

/// Fallback config name when a named project is missing
pub const DEFAULT_PROJECT_FILE: &str = "default.json";

/// Lock file guarding the project config directory
pub const PROJECTS_LOCK_FILE: &str = ".projects.lock";

// =============================================================================
// Schema
// =============================================================================

/// Complete project configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub project_name: String,

    /// Absolute path of the episode hierarchy
    pub project_root: PathBuf,

    /// Media role name -> subpath (relative to a version directory, except
    /// `audio` which is relative to the project root)
    pub media_paths: BTreeMap<String, String>,

    /// Ordered department list
    pub departments: Vec<String>,

    pub naming_convention: NamingConvention,

    #[serde(default)]
    pub settings: ProjectSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub scan: ScanSettings,
}

/// Token patterns (regular expressions) for the three hierarchy levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamingConvention {
    pub episode_pattern: String,
    pub sequence_pattern: String,
    pub shot_pattern: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            episode_pattern: r"Ep\d{2}".to_string(),
            sequence_pattern: r"sq\d{4}".to_string(),
            shot_pattern: r"SH\d{4}[A-Z]?".to_string(),
        }
    }
}

/// Display and resolution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSettings {
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Digit count used when displaying versions
    #[serde(default = "default_version_padding")]
    pub version_padding: usize,

    /// Lowest valid version number (0- or 1-based projects)
    #[serde(default = "default_first_version")]
    pub first_version: u32,

    /// Department used when a caller does not name one
    #[serde(default)]
    pub default_department: Option<String>,

    #[serde(default)]
    pub media_preference: MediaPreference,

    /// Duration (frames) assumed for media whose length is unknown
    #[serde(default = "default_shot_duration")]
    pub default_shot_duration: u64,
}

fn default_fps() -> f64 {
    24.0
}

fn default_version_padding() -> usize {
    DEFAULT_VERSION_WIDTH
}

fn default_first_version() -> u32 {
    DEFAULT_FIRST_VERSION
}

fn default_shot_duration() -> u64 {
    100
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            version_padding: default_version_padding(),
            first_version: default_first_version(),
            default_department: None,
            media_preference: MediaPreference::default(),
            default_shot_duration: default_shot_duration(),
        }
    }
}

impl ProjectSettings {
    /// Whether `version` is at or above the project's version base
    pub fn accepts_version(&self, version: VersionId) -> bool {
        version.number() >= self.first_version
    }

    /// Previous version text; fails at the project's first version
    pub fn decrement(&self, text: &str) -> CoreResult<String> {
        version::decrement(text, self.first_version)
    }

    pub fn increment(&self, text: &str) -> CoreResult<String> {
        version::increment(text)
    }

    /// `version` displayed with the project's padding
    pub fn display_version(&self, version: VersionId) -> String {
        version.reformat(self.version_padding).to_string()
    }
}

/// Two-tier cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries held in memory
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_secs: u64,

    /// `None` keeps disk units until invalidated
    #[serde(default = "default_disk_ttl")]
    pub disk_ttl_secs: Option<u64>,

    /// Overrides `{cache_dir}/shotline/<project_name>`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_memory_capacity() -> usize {
    512
}

fn default_memory_ttl() -> u64 {
    60
}

fn default_disk_ttl() -> Option<u64> {
    Some(3600)
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_capacity: default_memory_capacity(),
            memory_ttl_secs: default_memory_ttl(),
            disk_ttl_secs: default_disk_ttl(),
            cache_dir: None,
        }
    }
}

impl CacheSettings {
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn disk_ttl(&self) -> Option<Duration> {
        self.disk_ttl_secs.map(Duration::from_secs)
    }
}

/// Scanner settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSettings {
    /// Upper bound on concurrent directory listings
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_movie_extensions")]
    pub movie_extensions: Vec<String>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_audio_extensions")]
    pub audio_extensions: Vec<String>,
}

fn default_max_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_movie_extensions() -> Vec<String> {
    strings(&["mov", "mp4", "avi", "mkv"])
}

fn default_image_extensions() -> Vec<String> {
    strings(&["exr", "dpx", "png", "jpg", "jpeg", "tif", "tiff"])
}

fn default_audio_extensions() -> Vec<String> {
    strings(&["wav", "mp3", "aac", "aiff", "flac"])
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            movie_extensions: default_movie_extensions(),
            image_extensions: default_image_extensions(),
            audio_extensions: default_audio_extensions(),
        }
    }
}

impl ScanSettings {
    pub fn is_movie(&self, ext: &str) -> bool {
        contains_ext(&self.movie_extensions, ext)
    }

    pub fn is_image(&self, ext: &str) -> bool {
        contains_ext(&self.image_extensions, ext)
    }

    pub fn is_audio(&self, ext: &str) -> bool {
        contains_ext(&self.audio_extensions, ext)
    }
}

fn contains_ext(list: &[String], ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    list.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

// =============================================================================
// Loading & Validation
// =============================================================================

impl ProjectConfig {
    /// Minimal valid config for the given root, using default naming
    pub fn new(project_name: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        let mut media_paths = BTreeMap::new();
        media_paths.insert(RENDERS_ROLE.to_string(), RENDERS_ROLE.to_string());
        Self {
            project_name: project_name.into(),
            project_root: project_root.into(),
            media_paths,
            departments: strings(&["comp", "lighting", "fx", "anim"]),
            naming_convention: NamingConvention::default(),
            settings: ProjectSettings::default(),
            cache: CacheSettings::default(),
            scan: ScanSettings::default(),
        }
    }

    /// Parse, normalize and validate config JSON text
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let mut config: ProjectConfig = serde_json::from_str(text)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.is_file() {
            return Err(CoreError::ConfigNotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        info!(project = %config.project_name, path = %path.display(), "Loaded project config");
        Ok(config)
    }

    /// Clamp and clean values that have an obvious canonical form
    pub fn normalize(&mut self) {
        self.project_name = self.project_name.trim().to_string();
        for dept in &mut self.departments {
            *dept = dept.trim().to_string();
        }
        for list in [
            &mut self.scan.movie_extensions,
            &mut self.scan.image_extensions,
            &mut self.scan.audio_extensions,
        ] {
            for ext in list.iter_mut() {
                *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            }
        }
        self.scan.max_workers = self.scan.max_workers.max(1);
        self.cache.memory_capacity = self.cache.memory_capacity.max(1);
        if self.settings.default_department.is_none() {
            self.settings.default_department = self.departments.first().cloned();
        }
    }

    /// Collect every validation problem at once
    pub fn validate(&self) -> CoreResult<()> {
        let mut errors = Vec::new();

        if self.project_name.trim().is_empty() {
            errors.push("Missing required field: 'project_name'".to_string());
        }
        if self.project_root.as_os_str().is_empty() {
            errors.push("Missing required field: 'project_root'".to_string());
        } else if !self.project_root.is_absolute() {
            errors.push(format!(
                "'project_root' must be absolute: {}",
                self.project_root.display()
            ));
        }
        if !self.media_paths.contains_key(RENDERS_ROLE) {
            errors.push(format!("'media_paths' must contain a '{RENDERS_ROLE}' role"));
        }
        for (role, subpath) in &self.media_paths {
            if Path::new(subpath).is_absolute() || subpath.split(['/', '\\']).any(|s| s == "..") {
                errors.push(format!("Media role '{role}' must be a relative subpath: {subpath}"));
            }
        }
        if self.departments.is_empty() {
            errors.push("'departments' must not be empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for dept in &self.departments {
            if let Err(e) = validate_path_component(dept, "department name") {
                errors.push(e);
            } else if !seen.insert(dept.to_ascii_lowercase()) {
                errors.push(format!("Duplicate department: {dept}"));
            }
        }
        for (key, pattern) in [
            ("episode_pattern", &self.naming_convention.episode_pattern),
            ("sequence_pattern", &self.naming_convention.sequence_pattern),
            ("shot_pattern", &self.naming_convention.shot_pattern),
        ] {
            if pattern.trim().is_empty() {
                errors.push(format!("Missing naming pattern '{key}'"));
            } else if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("Invalid regex pattern '{key}': {e}"));
            }
        }
        if self.settings.version_padding == 0 {
            errors.push("'settings.version_padding' must be at least 1".to_string());
        }
        if !self.settings.fps.is_finite() || self.settings.fps <= 0.0 {
            errors.push(format!(
                "Invalid fps value: {} (must be positive number)",
                self.settings.fps
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ConfigInvalid(errors))
        }
    }

    /// Subpath of a media role
    pub fn media_subpath(&self, role: &str) -> Option<&str> {
        self.media_paths.get(role).map(String::as_str)
    }

    /// Roles searched for version media (every role except audio)
    pub fn version_media_roles(&self) -> impl Iterator<Item = (&str, &str)> {
        self.media_paths
            .iter()
            .filter(|(role, _)| role.as_str() != AUDIO_ROLE)
            .map(|(role, sub)| (role.as_str(), sub.as_str()))
    }

    /// Directory holding shot audio, when the project declares one
    pub fn audio_root(&self) -> Option<PathBuf> {
        self.media_subpath(AUDIO_ROLE)
            .map(|sub| self.project_root.join(sub))
    }

    /// Department used when none is requested
    pub fn primary_department(&self) -> Option<&str> {
        self.settings
            .default_department
            .as_deref()
            .or_else(|| self.departments.first().map(String::as_str))
    }

    /// Case-insensitive lookup returning the configured spelling
    pub fn find_department(&self, name: &str) -> Option<&str> {
        self.departments
            .iter()
            .find(|d| d.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Effective disk cache root
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("shotline")
                .join(sanitize_file_stem(&self.project_name)),
        }
    }
}

fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

// =============================================================================
// Project Store
// =============================================================================

/// Default directory of stored project configs
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shotline")
        .join("projects")
}

/// Sorted names of the project configs stored in `dir`
pub fn list_available_projects(dir: &Path) -> CoreResult<Vec<String>> {
    ProjectStore::new(dir.to_path_buf()).list()
}

/// Load `<dir>/<name>.json`, falling back to `<dir>/default.json`
pub fn load_named_project(dir: &Path, name: &str) -> CoreResult<ProjectConfig> {
    ProjectStore::new(dir.to_path_buf()).load(name)
}

/// Directory-backed store of named project configs
pub struct ProjectStore {
    dir: PathBuf,
}

impl ProjectStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store at [`config_dir`]
    pub fn default_location() -> Self {
        Self::new(config_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(PROJECTS_LOCK_FILE))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock project store: {}", e);
        }

        result
    }

    /// Names of stored projects, sorted
    pub fn list(&self) -> CoreResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Load a named project, falling back to `default.json`
    pub fn load(&self, name: &str) -> CoreResult<ProjectConfig> {
        self.with_lock(false, || {
            let named = self.dir.join(format!("{}.json", sanitize_file_stem(name)));
            if named.is_file() {
                return ProjectConfig::load(&named);
            }
            let fallback = self.dir.join(DEFAULT_PROJECT_FILE);
            if fallback.is_file() {
                info!(project = name, "Project config not found, using default.json");
                return ProjectConfig::load(&fallback);
            }
            Err(CoreError::ConfigNotFound(format!(
                "'{name}' (and no {DEFAULT_PROJECT_FILE}) in {}",
                self.dir.display()
            )))
        })
    }

    /// Validate and persist a project under its own name
    pub fn save(&self, config: &ProjectConfig) -> CoreResult<PathBuf> {
        config.validate()?;
        self.with_lock(true, || {
            let path = self
                .dir
                .join(format!("{}.json", sanitize_file_stem(&config.project_name)));
            atomic_write_json_pretty(&path, config)?;
            info!(path = %path.display(), "Project config saved");
            Ok(path)
        })
    }
}
