//! Naming & Path Parsing
//!
//! Pure functions extracting episode/sequence/shot/department/version/frame
//! tokens from names and paths using the project's naming patterns.

use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::config::NamingConvention;
use crate::core::version::VersionId;
use crate::core::{
    CoreError, CoreResult, DepartmentName, EpisodeName, FrameNumber, SequenceName, ShotName,
    ShotRef,
};

// =============================================================================
// Patterns
// =============================================================================

/// Compiled naming patterns, each matching a whole path segment
#[derive(Debug, Clone)]
pub struct NamingPatterns {
    episode: Regex,
    sequence: Regex,
    shot: Regex,
}

impl NamingPatterns {
    /// Compiles the three patterns case-insensitively, anchored to the segment
    pub fn compile(convention: &NamingConvention) -> CoreResult<Self> {
        Ok(Self {
            episode: anchored("episode_pattern", &convention.episode_pattern)?,
            sequence: anchored("sequence_pattern", &convention.sequence_pattern)?,
            shot: anchored("shot_pattern", &convention.shot_pattern)?,
        })
    }

    pub fn matches_episode(&self, name: &str) -> bool {
        self.episode.is_match(name)
    }

    pub fn matches_sequence(&self, name: &str) -> bool {
        self.sequence.is_match(name)
    }

    pub fn matches_shot(&self, name: &str) -> bool {
        self.shot.is_match(name)
    }
}

fn anchored(label: &str, pattern: &str) -> CoreResult<Regex> {
    Regex::new(&format!("(?i)^(?:{pattern})$")).map_err(|e| {
        CoreError::ConfigInvalid(vec![format!("Invalid regex pattern '{label}': {e}")])
    })
}

// =============================================================================
// Path Tokens
// =============================================================================

/// Tokens extracted from one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathTokens {
    pub episode: EpisodeName,
    pub sequence: SequenceName,
    pub shot: ShotName,
    pub department: Option<DepartmentName>,
    pub version: Option<VersionId>,
    pub frame: Option<FrameNumber>,
}

impl PathTokens {
    pub fn shot_ref(&self) -> ShotRef {
        ShotRef::new(&self.episode, &self.sequence, &self.shot)
    }
}

/// Parses episode/sequence/shot (required) and department/version/frame
/// (optional) tokens out of a path.
///
/// Segments are split on both separator styles. Each hierarchy token is the
/// first segment fully matching its pattern. The department is the first
/// segment after the shot equal to a configured department, and the version
/// the first `v<digits>` segment after the department.
pub fn parse_path(
    path: &str,
    patterns: &NamingPatterns,
    departments: &[String],
) -> CoreResult<PathTokens> {
    let segments: Vec<&str> = path.split(['/', '\\']).filter(|s| !s.is_empty()).collect();

    let find = |start: usize, pred: &dyn Fn(&str) -> bool| {
        segments
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, s)| pred(s))
            .map(|(i, s)| (i, s.to_string()))
    };

    let (ep_idx, episode) = find(0, &|s: &str| patterns.matches_episode(s))
        .ok_or_else(|| CoreError::parse(path, "no segment matches the episode pattern"))?;
    let (seq_idx, sequence) = find(ep_idx + 1, &|s: &str| patterns.matches_sequence(s))
        .ok_or_else(|| CoreError::parse(path, "no segment matches the sequence pattern"))?;
    let (shot_idx, shot) = find(seq_idx + 1, &|s: &str| patterns.matches_shot(s))
        .ok_or_else(|| CoreError::parse(path, "no segment matches the shot pattern"))?;

    let department = find(shot_idx + 1, &|s: &str| {
        departments.iter().any(|d| d.eq_ignore_ascii_case(s))
    })
    .and_then(|(idx, seg)| {
        departments
            .iter()
            .find(|d| d.eq_ignore_ascii_case(&seg))
            .map(|d| (idx, d.clone()))
    });

    let version = department.as_ref().and_then(|(dept_idx, _)| {
        find(dept_idx + 1, &|s: &str| is_version_name(s))
            .and_then(|(_, s)| VersionId::parse(&s).ok())
    });

    let frame = segments.last().and_then(|name| parse_frame_number(name));

    Ok(PathTokens {
        episode,
        sequence,
        shot,
        department: department.map(|(_, d)| d),
        version,
        frame,
    })
}

// =============================================================================
// Versions
// =============================================================================

/// Whether a name is exactly a version token (`v001`, `V12`)
pub fn is_version_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('v' | 'V'))
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_digit())
}

/// Extracts the first `v<digits>` token delimited by `_`, `.`, a path
/// separator or the string ends (`SH0010_comp_v009.mov` -> `v009`)
pub fn parse_version_token(name: &str) -> Option<VersionId> {
    name.split(['_', '.', '/', '\\'])
        .find(|seg| is_version_name(seg))
        .and_then(|seg| VersionId::parse(seg).ok())
}

// =============================================================================
// Frames
// =============================================================================

/// A file name split around its frame token (`base.1001.exr`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameName<'a> {
    pub base: &'a str,
    pub frame: FrameNumber,
    pub padding: usize,
    pub extension: &'a str,
}

/// Splits a trailing `.<digits>.<ext>` frame token off a file name
pub fn split_frame_name(name: &str) -> Option<FrameName<'_>> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut parts = file_name.rsplitn(3, '.');
    let extension = parts.next()?;
    let digits = parts.next()?;
    let base = parts.next()?;

    if base.is_empty()
        || extension.is_empty()
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        || digits.is_empty()
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    Some(FrameName {
        base,
        frame: digits.parse().ok()?,
        padding: digits.len(),
        extension,
    })
}

/// Frame number of `name.1001.exr`; `None` when there is no frame token
pub fn parse_frame_number(name: &str) -> Option<FrameNumber> {
    split_frame_name(name).map(|f| f.frame)
}

/// Digit count of the frame token
pub fn frame_padding(name: &str) -> Option<usize> {
    split_frame_name(name).map(|f| f.padding)
}

// =============================================================================
// Shots & Ordering
// =============================================================================

/// `SH0010A` is a sub-shot of `SH0010`
pub fn is_sub_shot(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2
        && bytes[bytes.len() - 1].is_ascii_alphabetic()
        && bytes[bytes.len() - 2].is_ascii_digit()
}

/// Shot name with any sub-shot suffix removed
pub fn base_shot(name: &str) -> &str {
    if is_sub_shot(name) {
        &name[..name.len() - 1]
    } else {
        name
    }
}

/// First run of digits in a name (`SH0100` -> 100)
pub fn shot_number(name: &str) -> Option<u64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Orders names by embedded number, then by full text; names without a
/// number sort last.
pub fn compare_shot_names(a: &str, b: &str) -> Ordering {
    match (shot_number(a), shot_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

pub fn sort_shot_names(names: &mut [String]) {
    names.sort_by(|a, b| compare_shot_names(a, b));
}

pub fn sort_sequence_names(names: &mut [String]) {
    names.sort_by(|a, b| compare_shot_names(a, b));
}
