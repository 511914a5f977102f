//! Composite cache keys

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered tuple of string segments, e.g. `("scan", "Ep01", "sq0010")`.
///
/// Keys with different segment counts or values are distinct; a key is a
/// prefix of every key that extends it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty key, a prefix of every key
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// This key extended by one segment
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for CacheKey {
    fn from(segments: [S; N]) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}
