//! Shotline Core Engine
//!
//! Project scanning, version resolution, scan caching and review timeline
//! building for shot-based VFX project trees.

pub mod cache;
pub mod config;
pub mod fs;
pub mod media;
pub mod naming;
pub mod scanner;
pub mod timeline;
pub mod version;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_integration;
