// SPDX-License-Identifier: MIT

//! Reference synchronizer: keeps sibling documents pointing at moved images
//!
//! Rewrites are a literal substring replacement of the old relative path
//! with the new one; no HTML or JSON parsing happens here. A document that
//! does not exist or does not mention the image is a no-op, never an error.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::Result;

/// Replace every mention of `original` with `new_path` in `document`, both
/// expressed relative to the document's directory. Returns whether the
/// document was rewritten. Nothing else in the file is altered.
pub fn sync_references(document: &Path, original: &Path, new_path: &Path) -> Result<bool> {
    if !document.is_file() {
        debug!("Reference document {:?} does not exist, skipping", document);
        return Ok(false);
    }

    let doc_dir = match document.parent() {
        Some(dir) => dir,
        None => return Ok(false),
    };

    let (old_ref, new_ref) = match (relative_to(original, doc_dir), relative_to(new_path, doc_dir)) {
        (Some(old_ref), Some(new_ref)) => (old_ref, new_ref),
        _ => {
            warn!(
                "Cannot express {:?} or {:?} relative to {:?}, skipping",
                original, new_path, doc_dir
            );
            return Ok(false);
        }
    };

    let content = std::fs::read_to_string(document)?;
    if !content.contains(&old_ref) {
        return Ok(false);
    }

    let updated = content.replace(&old_ref, &new_ref);
    std::fs::write(document, updated)?;
    info!("Updated {:?}: {} -> {}", document, old_ref, new_ref);

    Ok(true)
}

/// Sibling reference documents of `parent`: regular files directly inside
/// it whose extension is on the reference allow-list, sorted for
/// deterministic processing.
pub fn find_reference_documents(parent: &Path, reference_extensions: &[String]) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut documents: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|ext| reference_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .collect();

    documents.sort();
    documents
}

/// Forward-slash relative path of `path` under `base`, as written in
/// reference documents.
fn relative_to(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
