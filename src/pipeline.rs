// SPDX-License-Identifier: MIT

//! Batch orchestrator: drives scan groups through classify, move and resync
//!
//! Images are processed strictly sequentially in scan order. The destination
//! subtree is created lazily on the first positive match per directory, a
//! pacing delay separates successive oracle calls, and cancellation is
//! honored between images but never mid-move. Per-image failures are
//! recorded and the batch continues; the report stays valid at any
//! interruption point.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::ScheduleClassifier;
use crate::history::{self, MoveLog};
use crate::relocate::Relocator;
use crate::report::{DirectoryReport, FailureRecord, FailureStage, RunReport};
use crate::scanner::ImageGroup;
use crate::sync;

/// Caller-tunable knobs for one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub confidence_threshold: f64,
    pub pacing: Duration,
    pub reference_extensions: Vec<String>,
    pub dry_run: bool,
}

/// One classification-and-relocation batch over a set of image groups.
pub struct Pipeline {
    classifier: ScheduleClassifier,
    relocator: Relocator,
    move_log: Option<MoveLog>,
    options: PipelineOptions,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    pub fn new(
        classifier: ScheduleClassifier,
        relocator: Relocator,
        move_log: Option<MoveLog>,
        options: PipelineOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            classifier,
            relocator,
            move_log,
            options,
            shutdown,
        }
    }

    /// Process every group and return the finalized report. Never fails:
    /// per-image errors land in the report, not in a `Result`.
    pub async fn run(&self, groups: &[ImageGroup]) -> RunReport {
        let mut report = RunReport::new(self.options.dry_run);
        let mut cancelled = false;
        let mut first_call = true;

        'groups: for group in groups {
            let parent = match group.parent() {
                Some(parent) => parent.to_path_buf(),
                None => {
                    warn!("Group {:?} has no parent directory, skipping", group.directory);
                    continue;
                }
            };

            info!(
                "Processing {:?} ({} images)",
                group.directory,
                group.images.len()
            );

            let mut dir_report = DirectoryReport::new(group.directory.clone());
            // Created on the first positive match, so clean directories
            // never grow an empty subtree.
            let mut destination: Option<PathBuf> = None;

            for image_name in &group.images {
                if *self.shutdown.borrow() {
                    info!("Cancellation requested, stopping before next image");
                    cancelled = true;
                    report.push_directory(dir_report);
                    break 'groups;
                }

                let image_path = group.directory.join(image_name);
                dir_report.total += 1;

                if !first_call {
                    tokio::time::sleep(self.options.pacing).await;
                }
                first_call = false;

                let verdict = self.classifier.classify(&image_path).await;

                if !verdict.succeeded {
                    dir_report.errors += 1;
                    report.push_failure(FailureRecord {
                        image: image_path,
                        directory: group.directory.clone(),
                        stage: FailureStage::Classification,
                        detail: verdict
                            .error_detail
                            .unwrap_or_else(|| "unknown classification failure".to_string()),
                    });
                    continue;
                }

                dir_report.analyzed += 1;
                debug!(
                    "{:?}: match={} confidence={:.2} category={:?} attempts={}",
                    image_path,
                    verdict.is_match,
                    verdict.confidence,
                    verdict.category,
                    verdict.attempts_used
                );

                if !verdict.is_positive(self.options.confidence_threshold) {
                    continue;
                }

                dir_report.matched += 1;

                let dest_dir = match &destination {
                    Some(dest) => dest.clone(),
                    None => match self.relocator.ensure_destination(&parent) {
                        Ok(dest) => {
                            destination = Some(dest.clone());
                            dest
                        }
                        Err(e) => {
                            dir_report.errors += 1;
                            report.push_failure(FailureRecord {
                                image: image_path,
                                directory: group.directory.clone(),
                                stage: FailureStage::Relocation,
                                detail: format!("cannot create destination: {}", e),
                            });
                            continue;
                        }
                    },
                };

                let relocation = match self.relocator.relocate(&image_path, &dest_dir) {
                    Ok(relocation) => relocation,
                    Err(e) => {
                        dir_report.errors += 1;
                        report.push_failure(FailureRecord {
                            image: image_path,
                            directory: group.directory.clone(),
                            stage: FailureStage::Relocation,
                            detail: e.to_string(),
                        });
                        continue;
                    }
                };

                dir_report.moved += 1;

                let new_path = match relocation.new_path {
                    Some(new_path) => new_path,
                    None => continue,
                };

                if self.options.dry_run {
                    continue;
                }

                let documents_updated =
                    self.sync_group_references(&parent, &image_path, &new_path, &mut report);

                if let Some(log) = &self.move_log {
                    let file_hash = history::hash_file(&new_path).unwrap_or_default();
                    let record = history::create_record(
                        image_path.clone(),
                        new_path,
                        verdict.category,
                        verdict.confidence,
                        file_hash,
                        documents_updated,
                    );
                    if let Err(e) = log.append(&record) {
                        warn!("Could not append to move log: {}", e);
                    }
                }
            }

            if !cancelled {
                report.push_directory(dir_report);
            }
        }

        report.finalize(cancelled);
        report
    }

    /// Rewrite references in every sibling document of `parent`. Sync
    /// failures are warnings: the move is the source of truth and is never
    /// rolled back.
    fn sync_group_references(
        &self,
        parent: &std::path::Path,
        original: &std::path::Path,
        new_path: &std::path::Path,
        report: &mut RunReport,
    ) -> Vec<PathBuf> {
        let mut updated = Vec::new();

        for document in sync::find_reference_documents(parent, &self.options.reference_extensions)
        {
            match sync::sync_references(&document, original, new_path) {
                Ok(true) => updated.push(document),
                Ok(false) => {}
                Err(e) => {
                    warn!("Reference sync failed for {:?}: {}", document, e);
                    report.push_sync_warning(format!("{}: {}", document.display(), e));
                }
            }
        }

        updated
    }
}
