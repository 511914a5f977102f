//! Directory listing primitives used by the scanner

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Directories found in one listing
#[derive(Debug, Default)]
pub(crate) struct DirListing {
    /// Sorted subdirectory names
    pub dirs: Vec<String>,
    /// Entries read, including files and skipped names
    pub visited: u64,
    /// Entries that could not be classified (broken links, bad names)
    pub problems: Vec<(PathBuf, String)>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Lists the immediate subdirectories of `dir`, following symlinks.
///
/// Fails only when `dir` itself cannot be read; per-entry problems are
/// reported in [`DirListing::problems`].
pub(crate) async fn list_subdirs(dir: &Path) -> io::Result<DirListing> {
    let mut listing = DirListing::default();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        listing.visited += 1;
        let path = entry.path();

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                listing
                    .problems
                    .push((path, format!("Name is not valid UTF-8: {raw:?}")));
                continue;
            }
        };
        if is_hidden(&name) {
            continue;
        }

        let file_type = match entry.file_type().await {
            Ok(ft) => ft,
            Err(e) => {
                listing.problems.push((path, format!("Unreadable entry: {e}")));
                continue;
            }
        };

        let is_dir = if file_type.is_symlink() {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.is_dir(),
                Err(e) => {
                    listing.problems.push((path, format!("Broken symlink: {e}")));
                    continue;
                }
            }
        } else {
            file_type.is_dir()
        };

        if is_dir {
            listing.dirs.push(name);
        }
    }

    listing.dirs.sort();
    Ok(listing)
}

/// Whether `dir` (or a subdirectory up to `max_depth` below it) holds a
/// regular, non-hidden file. A missing `dir` holds nothing.
pub(crate) async fn contains_file(dir: &Path, max_depth: usize) -> io::Result<(bool, u64)> {
    let mut visited = 0u64;
    let mut stack: Vec<(PathBuf, usize)> = vec![(dir.to_path_buf(), 0)];

    while let Some((current, depth)) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && current == dir => {
                return Ok((false, visited));
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            visited += 1;
            let name = entry.file_name();
            if name.to_str().map_or(false, is_hidden) {
                continue;
            }

            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(path = %entry.path().display(), "Skipping unreadable media entry: {}", e);
                    continue;
                }
            };

            if meta.is_file() {
                return Ok((true, visited));
            }
            if meta.is_dir() && depth < max_depth {
                stack.push((entry.path(), depth + 1));
            }
        }
    }

    Ok((false, visited))
}
