//! Frame sequence detection

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::FrameSequence;
use crate::core::naming::split_frame_name;
use crate::core::FrameNumber;

/// Groups numbered image files of one directory into sequences.
///
/// Files are grouped by base name and extension; names without a frame
/// token or rejected by `is_image` are ignored. The result is ordered by
/// base name, then extension.
pub fn detect_sequences<'a>(
    directory: &Path,
    file_names: impl IntoIterator<Item = &'a str>,
    is_image: impl Fn(&str) -> bool,
) -> Vec<FrameSequence> {
    let mut groups: BTreeMap<(String, String), (BTreeSet<FrameNumber>, usize)> = BTreeMap::new();

    for name in file_names {
        let Some(frame) = split_frame_name(name) else {
            continue;
        };
        if !is_image(frame.extension) {
            continue;
        }
        let group = groups
            .entry((frame.base.to_string(), frame.extension.to_string()))
            .or_insert_with(|| (BTreeSet::new(), frame.padding));
        group.0.insert(frame.frame);
        // Unpadded high frames (10000 in a 4-digit sequence) keep the narrower width
        group.1 = group.1.min(frame.padding);
    }

    groups
        .into_iter()
        .filter_map(|((base_name, extension), (frames, padding))| {
            let first_frame = *frames.first()?;
            let last_frame = *frames.last()?;
            let missing_frames = (first_frame..=last_frame)
                .filter(|f| !frames.contains(f))
                .collect();
            Some(FrameSequence {
                directory: directory.to_path_buf(),
                base_name,
                extension,
                padding,
                first_frame,
                last_frame,
                frame_count: frames.len() as u64,
                missing_frames,
            })
        })
        .collect()
}
