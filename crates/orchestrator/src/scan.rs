//! Queue input collection.
//!
//! Expands the paths given on the command line into an ordered list of
//! source files. Directories are walked only when recursion is requested.

use crate::naming::TRANSCODE_SUFFIX;
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions accepted from directory walks (case-insensitive).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".mpg", ".mpeg", ".m2ts",
    ".ts", ".vob", ".3gp",
];

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Pre-transcode intermediates left behind by an interrupted run
fn is_intermediate(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_lowercase().ends_with(TRANSCODE_SUFFIX))
        .unwrap_or(false)
}

/// Video files below `root`, in walk order, skipping hidden directories.
fn walk_videos(root: &Path) -> Vec<PathBuf> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            // The root itself may be hidden
            !(entry.file_type().is_dir()
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with('.'))
                    .unwrap_or(false))
        });

    walker
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_video_file(path) && !is_intermediate(path))
        .collect()
}

/// Expand the queue input into source files
///
/// Files are taken as given, whatever their extension. Directories are
/// walked when `recursive` is set and skipped with a warning otherwise.
/// The result keeps first-seen order with duplicates removed.
pub fn collect_inputs(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for path in paths {
        let found = if path.is_dir() {
            if !recursive {
                warn!("Skipping directory {} (use --recursive)", path.display());
                continue;
            }
            let videos = walk_videos(path);
            debug!("Found {} video files in {}", videos.len(), path.display());
            videos
        } else {
            vec![path.clone()]
        };

        for file in found {
            if seen.insert(file.clone()) {
                inputs.push(file);
            }
        }
    }

    inputs
}
