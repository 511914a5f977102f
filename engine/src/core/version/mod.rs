//! Version Model
//!
//! Parses, formats, compares, sorts and steps version identifiers.
//! Versions are integer-ordered; the zero padding used to display them is
//! never semantically significant (`v01 == v001`).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::{CoreError, CoreResult};

/// Default display width for version digits
pub const DEFAULT_VERSION_WIDTH: usize = 3;

/// Default first version of a project (versions are 1-based by convention)
pub const DEFAULT_FIRST_VERSION: u32 = 1;

// =============================================================================
// VersionId
// =============================================================================

/// A version identifier: an integer value plus the width it was written with.
///
/// Equality, ordering and hashing use the integer value only.
#[derive(Clone, Copy, Debug)]
pub struct VersionId {
    number: u32,
    width: usize,
}

impl VersionId {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            width: DEFAULT_VERSION_WIDTH,
        }
    }

    pub fn with_width(number: u32, width: usize) -> Self {
        Self {
            number,
            width: width.max(1),
        }
    }

    /// Parses `v009`, `V9`, `take_12` ...; the width is the digit count seen
    pub fn parse(text: &str) -> CoreResult<Self> {
        let digits = strip_prefix(text)?;
        let number = parse_digits(text, digits)?;
        Ok(Self {
            number,
            width: digits.len(),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Same value, displayed with another width
    pub fn reformat(&self, width: usize) -> Self {
        Self::with_width(self.number, width)
    }

    /// Canonical text form, `v` followed by zero padded digits
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for VersionId {}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state);
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{:0width$}", self.number, width = self.width)
    }
}

impl FromStr for VersionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        VersionId::parse(&text).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Text Operations
// =============================================================================

fn strip_prefix(text: &str) -> CoreResult<&str> {
    let trimmed = text.trim();
    let start = trimmed
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| CoreError::InvalidVersionFormat(format!("'{text}' has no digits")))?;
    Ok(&trimmed[start..])
}

fn parse_digits(text: &str, digits: &str) -> CoreResult<u32> {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::InvalidVersionFormat(format!(
            "'{text}' has non-numeric characters after its digits"
        )));
    }
    digits
        .parse::<u32>()
        .map_err(|e| CoreError::InvalidVersionFormat(format!("'{text}': {e}")))
}

/// Parses a version text to its integer value
pub fn parse(text: &str) -> CoreResult<u32> {
    VersionId::parse(text).map(|v| v.number)
}

/// Formats an integer as `v` + digits zero padded to `width`
pub fn format(n: i64, width: usize) -> CoreResult<String> {
    if n < 0 {
        return Err(CoreError::InvalidVersionFormat(format!(
            "negative version {n}"
        )));
    }
    let number = u32::try_from(n)
        .map_err(|_| CoreError::InvalidVersionFormat(format!("version {n} out of range")))?;
    Ok(VersionId::with_width(number, width).to_string())
}

/// Compares two version texts by integer value
pub fn compare(a: &str, b: &str) -> CoreResult<Ordering> {
    Ok(parse(a)?.cmp(&parse(b)?))
}

/// Sorts version texts ascending by value; equal values keep their order
pub fn sort(versions: &[String]) -> CoreResult<Vec<String>> {
    let mut keyed = versions
        .iter()
        .map(|v| parse(v).map(|n| (n, v.clone())))
        .collect::<CoreResult<Vec<_>>>()?;
    keyed.sort_by_key(|(n, _)| *n);
    Ok(keyed.into_iter().map(|(_, v)| v).collect())
}

/// Highest version text of the list
pub fn latest(versions: &[String]) -> CoreResult<String> {
    let sorted = sort(versions)?;
    sorted.into_iter().last().ok_or(CoreError::EmptyVersionSet)
}

/// Lowest version text of the list
pub fn earliest(versions: &[String]) -> CoreResult<String> {
    let sorted = sort(versions)?;
    sorted.into_iter().next().ok_or(CoreError::EmptyVersionSet)
}

/// Next version, keeping the input width
pub fn increment(text: &str) -> CoreResult<String> {
    let version = VersionId::parse(text)?;
    let next = version
        .number
        .checked_add(1)
        .ok_or_else(|| CoreError::InvalidVersionFormat(format!("'{text}' cannot be incremented")))?;
    Ok(VersionId::with_width(next, version.width).to_string())
}

/// Previous version, keeping the input width.
///
/// Fails at or below `first_version` (the project's version base) and always
/// fails for version 0.
pub fn decrement(text: &str, first_version: u32) -> CoreResult<String> {
    let version = VersionId::parse(text)?;
    if version.number == 0 || version.number <= first_version {
        return Err(CoreError::NoPreviousVersion(text.to_string()));
    }
    Ok(VersionId::with_width(version.number - 1, version.width).to_string())
}

/// Inclusive list of versions between two texts, bounds in either order
pub fn version_range(start: &str, end: &str, width: usize) -> CoreResult<Vec<String>> {
    let (mut lo, mut hi) = (parse(start)?, parse(end)?);
    if lo > hi {
        std::mem::swap(&mut lo, &mut hi);
    }
    Ok((lo..=hi)
        .map(|n| VersionId::with_width(n, width).to_string())
        .collect())
}

// =============================================================================
// Typed Operations
// =============================================================================

/// Maximum of the set
pub fn latest_of(versions: &[VersionId]) -> CoreResult<VersionId> {
    versions.iter().max().copied().ok_or(CoreError::EmptyVersionSet)
}

/// Largest version not exceeding `limit`
pub fn latest_not_exceeding(versions: &[VersionId], limit: VersionId) -> Option<VersionId> {
    versions.iter().filter(|v| **v <= limit).max().copied()
}

/// Smallest version strictly greater than `current`
pub fn next_available(current: VersionId, versions: &[VersionId]) -> Option<VersionId> {
    versions.iter().filter(|v| **v > current).min().copied()
}

/// Largest version strictly lower than `current`
pub fn previous_available(current: VersionId, versions: &[VersionId]) -> Option<VersionId> {
    versions.iter().filter(|v| **v < current).max().copied()
}
