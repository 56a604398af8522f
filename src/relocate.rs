// SPDX-License-Identifier: MIT

//! Relocation of matched images into the destination subtree

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{Result, SchedsiftError};

/// Outcome of one move. `new_path`, once set, is the sole authority for
/// where the file lives; callers must not recompute it.
#[derive(Debug, Clone)]
pub struct RelocationResult {
    pub original_path: PathBuf,
    pub new_path: Option<PathBuf>,
    pub collision_resolved: bool,
}

/// Creates destination subtrees and moves files into them. In dry-run mode
/// every path is computed but nothing on disk changes; names handed out
/// during the run are tracked in `reserved` so collision resolution sees
/// them even though no file was written.
pub struct Relocator {
    subtree: Vec<String>,
    dry_run: bool,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl Relocator {
    pub fn new(subtree: Vec<String>, dry_run: bool) -> Self {
        Self {
            subtree,
            dry_run,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Compute (and in live mode create, idempotently) the destination
    /// subtree under `parent`. `create_dir_all` makes repeated calls a
    /// no-op once the tree exists.
    pub fn ensure_destination(&self, parent: &Path) -> Result<PathBuf> {
        let mut dest = parent.to_path_buf();
        for component in &self.subtree {
            dest.push(component);
        }

        if !self.dry_run && !dest.is_dir() {
            std::fs::create_dir_all(&dest)?;
            info!("Created destination {:?}", dest);
        }

        Ok(dest)
    }

    /// Move `source` into `dest_dir`, resolving name collisions by
    /// appending `_1`, `_2`, ... before the extension. On failure the
    /// source file is left untouched.
    pub fn relocate(&self, source: &Path, dest_dir: &Path) -> Result<RelocationResult> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SchedsiftError::Relocation(format!("bad source name: {:?}", source)))?;

        let (target, collision_resolved) = self.resolve_collision(dest_dir, file_name);

        if self.dry_run {
            self.reserved.lock().unwrap().insert(target.clone());
            debug!("DRY RUN: would move {:?} to {:?}", source, target);
            return Ok(RelocationResult {
                original_path: source.to_path_buf(),
                new_path: Some(target),
                collision_resolved,
            });
        }

        move_file(source, &target)?;
        info!("Moved {:?} to {:?}", source, target);

        Ok(RelocationResult {
            original_path: source.to_path_buf(),
            new_path: Some(target),
            collision_resolved,
        })
    }

    /// First free name in `dest_dir` for `file_name`: the name itself, then
    /// `stem_1.ext`, `stem_2.ext`, ... A name counts as taken when it exists
    /// on disk or was already handed out earlier in this run.
    fn resolve_collision(&self, dest_dir: &Path, file_name: &str) -> (PathBuf, bool) {
        let reserved = self.reserved.lock().unwrap();
        let taken = |candidate: &Path| candidate.exists() || reserved.contains(candidate);

        let candidate = dest_dir.join(file_name);
        if !taken(&candidate) {
            return (candidate, false);
        }

        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (file_name, None),
        };

        for counter in 1u64.. {
            let name = match ext {
                Some(ext) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", stem, counter),
            };
            let candidate = dest_dir.join(name);
            if !taken(&candidate) {
                return (candidate, true);
            }
        }
        unreachable!("collision counter is unbounded")
    }
}

/// Rename with a copy+remove fallback for cross-device moves. If the copy
/// fails any partially-written target is deleted and the source is
/// untouched; if the remove fails the copy is deleted so the file never
/// ends up in neither place.
fn move_file(source: &Path, target: &Path) -> Result<()> {
    if std::fs::rename(source, target).is_ok() {
        return Ok(());
    }

    std::fs::copy(source, target).map_err(|e| {
        let _ = std::fs::remove_file(target);
        SchedsiftError::Relocation(format!("copy {:?} to {:?} failed: {}", source, target, e))
    })?;

    if let Err(e) = std::fs::remove_file(source) {
        let _ = std::fs::remove_file(target);
        return Err(SchedsiftError::Relocation(format!(
            "could not remove {:?} after copy: {}",
            source, e
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn subtree() -> Vec<String> {
        vec!["schedules", "Schedules", "images"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn ensure_destination_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let relocator = Relocator::new(subtree(), false);

        let first = relocator.ensure_destination(dir.path()).unwrap();
        let second = relocator.ensure_destination(dir.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("schedules/Schedules/images"));
        assert!(first.is_dir());
    }

    #[test]
    fn dry_run_computes_destination_without_creating() {
        let dir = tempfile::tempdir().unwrap();
        let relocator = Relocator::new(subtree(), true);

        let dest = relocator.ensure_destination(dir.path()).unwrap();
        assert_eq!(dest, dir.path().join("schedules/Schedules/images"));
        assert!(!dest.exists());
    }

    #[test]
    fn move_removes_source_and_creates_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("foo.png");
        fs::write(&source, b"bytes").unwrap();
        let relocator = Relocator::new(subtree(), false);
        let dest = relocator.ensure_destination(dir.path()).unwrap();

        let result = relocator.relocate(&source, &dest).unwrap();

        let new_path = result.new_path.unwrap();
        assert_eq!(new_path, dest.join("foo.png"));
        assert!(!result.collision_resolved);
        assert!(!source.exists());
        assert_eq!(fs::read(&new_path).unwrap(), b"bytes");
    }

    #[test]
    fn collisions_resolve_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let relocator = Relocator::new(subtree(), false);
        let dest = relocator.ensure_destination(dir.path()).unwrap();

        for (i, content) in [&b"one"[..], &b"two"[..], &b"three"[..]].iter().enumerate() {
            let source = dir.path().join(format!("src{}", i)).join("foo.png");
            fs::create_dir_all(source.parent().unwrap()).unwrap();
            fs::write(&source, content).unwrap();
            relocator.relocate(&source, &dest).unwrap();
        }

        assert!(dest.join("foo.png").exists());
        assert!(dest.join("foo_1.png").exists());
        assert!(dest.join("foo_2.png").exists());
        assert_eq!(fs::read(dest.join("foo_1.png")).unwrap(), b"two");
    }

    #[test]
    fn collision_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chart"), b"x").unwrap();
        let relocator = Relocator::new(subtree(), false);
        let (path, resolved) = relocator.resolve_collision(dir.path(), "chart");
        assert!(resolved);
        assert_eq!(path, dir.path().join("chart_1"));
    }

    #[test]
    fn dry_run_move_leaves_filesystem_alone() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("foo.png");
        fs::write(&source, b"bytes").unwrap();
        let relocator = Relocator::new(subtree(), true);
        let dest = relocator.ensure_destination(dir.path()).unwrap();

        let result = relocator.relocate(&source, &dest).unwrap();

        assert_eq!(result.new_path.unwrap(), dest.join("foo.png"));
        assert!(source.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn failed_move_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("foo.png");
        fs::write(&source, b"bytes").unwrap();
        let relocator = Relocator::new(subtree(), false);

        // Destination directory never created, so the move fails.
        let missing = dir.path().join("does/not/exist");
        assert!(relocator.relocate(&source, &missing).is_err());
        assert!(source.exists());
        assert!(!missing.join("foo.png").exists());
    }

    #[test]
    fn failed_copy_removes_partial_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("gone.png");
        let target = dir.path().join("gone_copy.png");
        // Stand in for a half-written copy left by an interrupted transfer.
        fs::write(&target, b"partial").unwrap();

        assert!(move_file(&source, &target).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn dry_run_reserves_resolved_names() {
        let dir = tempfile::tempdir().unwrap();
        let relocator = Relocator::new(subtree(), true);
        let dest = relocator.ensure_destination(dir.path()).unwrap();

        for src_dir in ["one", "two"] {
            let source = dir.path().join(src_dir).join("foo.png");
            fs::create_dir_all(source.parent().unwrap()).unwrap();
            fs::write(&source, b"x").unwrap();
        }

        let first = relocator
            .relocate(&dir.path().join("one/foo.png"), &dest)
            .unwrap();
        let second = relocator
            .relocate(&dir.path().join("two/foo.png"), &dest)
            .unwrap();

        assert_eq!(first.new_path.unwrap(), dest.join("foo.png"));
        assert_eq!(second.new_path.unwrap(), dest.join("foo_1.png"));
        assert!(second.collision_resolved);
        assert!(!dest.exists());
    }
}
