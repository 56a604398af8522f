// SPDX-License-Identifier: MIT

//! Directory scanner: finds image-bearing candidate directories

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One image-bearing directory and its image files, in lexicographic order.
#[derive(Debug, Clone)]
pub struct ImageGroup {
    pub directory: PathBuf,
    pub images: Vec<String>,
}

impl ImageGroup {
    /// Parent directory of the group; destination subtree and reference
    /// documents both live here.
    pub fn parent(&self) -> Option<&Path> {
        self.directory.parent()
    }
}

/// Walk `root` and collect every directory whose name contains `marker`
/// (case-insensitive) and that directly holds at least one file with an
/// allow-listed image extension.
///
/// When `only_folder` is set, scanning is restricted to `root/<only_folder>`.
/// A missing root yields an empty list, not an error; the caller decides
/// whether that is fatal. Groups and files within a group are ordered
/// lexicographically so repeated runs visit images in the same order.
///
/// Directories lying under a `destination` subtree are never candidates:
/// the subtree's own leaf matches the marker, and re-scanning it would
/// relocate already-moved files again on the next run.
pub fn scan(
    root: &Path,
    only_folder: Option<&str>,
    marker: &str,
    image_extensions: &[String],
    destination: &[String],
) -> Vec<ImageGroup> {
    let scan_root = match only_folder {
        Some(folder) => root.join(folder),
        None => root.to_path_buf(),
    };

    if !scan_root.is_dir() {
        warn!("Scan root {:?} does not exist, nothing to do", scan_root);
        return Vec::new();
    }

    let marker_lower = marker.to_lowercase();
    let mut groups = Vec::new();

    for entry in WalkDir::new(&scan_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.contains(&marker_lower) {
            continue;
        }

        if is_under_destination(entry.path(), destination) {
            debug!("Skipping {:?}: inside a destination subtree", entry.path());
            continue;
        }

        let images = list_images(entry.path(), image_extensions);
        if images.is_empty() {
            debug!("Skipping {:?}: no image files", entry.path());
            continue;
        }

        groups.push(ImageGroup {
            directory: entry.path().to_path_buf(),
            images,
        });
    }

    groups.sort_by(|a, b| a.directory.cmp(&b.directory));
    groups
}

/// True when `path` contains the destination components as a consecutive
/// run, i.e. it is the destination subtree created by a previous run or
/// anything below it.
fn is_under_destination(path: &Path, destination: &[String]) -> bool {
    if destination.is_empty() {
        return false;
    }
    let components: Vec<&std::ffi::OsStr> =
        path.components().map(|c| c.as_os_str()).collect();
    components.windows(destination.len()).any(|window| {
        window
            .iter()
            .zip(destination)
            .all(|(component, expected)| *component == std::ffi::OsStr::new(expected))
    })
}

/// List image filenames directly inside `dir`, lexicographically sorted.
fn list_images(dir: &Path, image_extensions: &[String]) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut images: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| has_image_extension(&e.path(), image_extensions))
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();

    images.sort();
    images
}

/// Check a path against the image extension allow-list, case-insensitive.
pub fn has_image_extension(path: &Path, image_extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| image_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
