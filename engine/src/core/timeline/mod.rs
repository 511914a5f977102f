//! Review Timeline
//!
//! Version policies, resolved entries and the builder that turns scan state
//! into an ordered review timeline.

mod builder;
mod models;
mod policy;

pub use builder::{assign_positions, plan_update, timeline_name, TimelineBuilder};
pub use models::{
    BuildOptions, BuildResult, BuildWarning, BuildWarningKind, ResolvedTimelineEntry, SkippedShot,
    TimelineRequest, TimelineUpdate,
};
pub use policy::{Resolution, VersionPolicy, VersionStep};
