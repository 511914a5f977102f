//! Shotline Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

use super::{DepartmentName, ShotName};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Naming Errors
    // =========================================================================
    #[error("Parse error for '{input}': {reason}")]
    Parse { input: String, reason: String },

    // =========================================================================
    // Version Errors
    // =========================================================================
    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    #[error("Version set is empty")]
    EmptyVersionSet,

    #[error("No version before {0}")]
    NoPreviousVersion(String),

    // =========================================================================
    // Scan Errors
    // =========================================================================
    #[error("Project root unreachable: {path}: {reason}")]
    ProjectRootUnreachable { path: String, reason: String },

    #[error("Scan cancelled")]
    ScanCancelled,

    // =========================================================================
    // Cache Errors
    // =========================================================================
    #[error("Cache unit corrupted: {0}")]
    CacheCorruption(String),

    // =========================================================================
    // Timeline Errors
    // =========================================================================
    #[error("No versions available for {shot} in department {department}")]
    NoVersionsAvailable {
        shot: ShotName,
        department: DepartmentName,
    },

    #[error("Department {department} has no output for {shot}")]
    DepartmentNotRendered {
        shot: ShotName,
        department: DepartmentName,
    },

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("FFprobe error: {0}")]
    FFprobeError(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Project configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid project configuration: {}", .0.join("; "))]
    ConfigInvalid(Vec<String>),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Shorthand for a [`CoreError::Parse`] error
    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error describes an environmental condition that callers
    /// may absorb into a degraded result instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Parse { .. }
                | CoreError::CacheCorruption(_)
                | CoreError::NoVersionsAvailable { .. }
                | CoreError::DepartmentNotRendered { .. }
                | CoreError::MediaNotFound(_)
                | CoreError::FFprobeError(_)
                | CoreError::IoError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_joins_messages() {
        let err = CoreError::ConfigInvalid(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Invalid project configuration: a; b");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(CoreError::parse("x", "no match").is_recoverable());
        assert!(!CoreError::EmptyVersionSet.is_recoverable());
        assert!(!CoreError::ProjectRootUnreachable {
            path: "/p".into(),
            reason: "gone".into()
        }
        .is_recoverable());
    }
}
