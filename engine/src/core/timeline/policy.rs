//! Version selection policy

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::version::{self, VersionId};
use crate::core::{CoreError, CoreResult};

/// Which version of a department a timeline entry uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionPolicy {
    #[default]
    Latest,
    /// An exact version, falling back to the nearest lower one
    Specific(VersionId),
}

impl FromStr for VersionPolicy {
    type Err = CoreError;

    /// Accepts `latest`, `specific: v002`, `specific:2` and bare `v002`
    fn from_str(text: &str) -> CoreResult<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(VersionPolicy::Latest);
        }

        let version_text = match trimmed.split_once(':') {
            Some((head, tail)) if head.trim().eq_ignore_ascii_case("specific") => tail.trim(),
            Some(_) => {
                return Err(CoreError::parse(text, "expected 'latest' or 'specific: <version>'"))
            }
            None => trimmed,
        };
        Ok(VersionPolicy::Specific(VersionId::parse(version_text)?))
    }
}

impl TryFrom<String> for VersionPolicy {
    type Error = CoreError;

    fn try_from(text: String) -> CoreResult<Self> {
        text.parse()
    }
}

impl From<VersionPolicy> for String {
    fn from(policy: VersionPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for VersionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPolicy::Latest => f.write_str("latest"),
            VersionPolicy::Specific(version) => write!(f, "specific: {version}"),
        }
    }
}

/// Direction for stepping every entry through its versions on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStep {
    Next,
    Previous,
}

impl VersionStep {
    pub fn apply(self, current: VersionId, versions: &[VersionId]) -> Option<VersionId> {
        match self {
            VersionStep::Next => version::next_available(current, versions),
            VersionStep::Previous => version::previous_available(current, versions),
        }
    }
}

/// A version picked for an entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub version: VersionId,
    /// Set when the requested version was not on disk
    pub fallback: Option<String>,
}

impl VersionPolicy {
    /// Picks a version from the ascending `versions` present on disk.
    ///
    /// `None` only when `versions` is empty. A missing specific version
    /// resolves to the largest one below it, or the earliest when every
    /// version is above the request.
    pub fn resolve(&self, versions: &[VersionId]) -> Option<Resolution> {
        let latest = version::latest_of(versions).ok()?;

        let requested = match self {
            VersionPolicy::Latest => {
                return Some(Resolution {
                    version: latest,
                    fallback: None,
                })
            }
            VersionPolicy::Specific(requested) => *requested,
        };

        if let Some(found) = versions.iter().find(|v| **v == requested) {
            return Some(Resolution {
                version: *found,
                fallback: None,
            });
        }

        let (version, reason) = match version::latest_not_exceeding(versions, requested) {
            Some(lower) => (lower, "using the nearest lower version"),
            None => (
                versions.iter().min().copied().unwrap_or(latest),
                "every version is newer, using the earliest",
            ),
        };
        Some(Resolution {
            version,
            fallback: Some(format!("{requested} not found, {reason} {version}")),
        })
    }
}
