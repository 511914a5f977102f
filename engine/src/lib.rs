//! Shotline Core Library
//!
//! Indexes shot/department/version trees on project storage and resolves
//! them into ordered review timelines. The scanner caches every directory
//! level in a memory + disk cache so repeated scans of slow network storage
//! stay cheap.
//!
//! ## Layout
//!
//! - [`core::naming`] and [`core::version`]: pure name and version parsing
//! - [`core::cache`]: two-tier cache with prefix invalidation and coalescing
//! - [`core::scanner`]: cached, concurrent project walk
//! - [`core::media`]: media and audio inspection
//! - [`core::timeline`]: version policies and the timeline builder

pub mod core;
pub mod logging;

pub use crate::core::{CoreError, CoreResult};
