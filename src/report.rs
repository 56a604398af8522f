// SPDX-License-Identifier: MIT

//! Run report: per-directory and global counters plus failure records

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Where in the per-image saga a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Classification,
    Relocation,
}

/// One failed image, with enough context to retry it later.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub image: PathBuf,
    pub directory: PathBuf,
    pub stage: FailureStage,
    pub detail: String,
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Cancelled between images; counters up to that point are valid.
    Interrupted,
    /// Every attempted classification failed; distinct from "nothing
    /// matched" so an unreachable oracle does not read as 0% detection.
    OracleUnavailable,
}

/// Counters for one scanned directory. The invariant
/// `moved <= matched <= analyzed <= total` holds after every record call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub total: usize,
    pub analyzed: usize,
    pub matched: usize,
    pub moved: usize,
    pub errors: usize,
}

impl DirectoryReport {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            ..Default::default()
        }
    }
}

/// Aggregate over a whole run, owned by the orchestrator and finalized once.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub directories: Vec<DirectoryReport>,
    pub failures: Vec<FailureRecord>,
    pub sync_warnings: Vec<String>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started: Utc::now(),
            finished: None,
            dry_run,
            status: RunStatus::Completed,
            directories: Vec::new(),
            failures: Vec::new(),
            sync_warnings: Vec::new(),
        }
    }

    pub fn push_directory(&mut self, directory: DirectoryReport) {
        self.directories.push(directory);
    }

    pub fn push_failure(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    pub fn push_sync_warning(&mut self, warning: String) {
        self.sync_warnings.push(warning);
    }

    pub fn total(&self) -> usize {
        self.directories.iter().map(|d| d.total).sum()
    }

    pub fn analyzed(&self) -> usize {
        self.directories.iter().map(|d| d.analyzed).sum()
    }

    pub fn matched(&self) -> usize {
        self.directories.iter().map(|d| d.matched).sum()
    }

    pub fn moved(&self) -> usize {
        self.directories.iter().map(|d| d.moved).sum()
    }

    pub fn errors(&self) -> usize {
        self.directories.iter().map(|d| d.errors).sum()
    }

    /// `moved <= matched <= analyzed <= total`, globally and per directory.
    pub fn invariant_holds(&self) -> bool {
        self.directories
            .iter()
            .all(|d| d.moved <= d.matched && d.matched <= d.analyzed && d.analyzed <= d.total)
    }

    /// Close the report and settle the run status.
    pub fn finalize(&mut self, cancelled: bool) {
        self.finished = Some(Utc::now());
        self.status = if cancelled {
            RunStatus::Interrupted
        } else if self.total() > 0 && self.analyzed() == 0 && self.errors() > 0 {
            RunStatus::OracleUnavailable
        } else {
            RunStatus::Completed
        };
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { "dry-run" } else { "live" };
        writeln!(f, "Run summary ({} mode, status: {:?})", mode, self.status)?;
        writeln!(f, "==========================================")?;

        for dir in &self.directories {
            writeln!(
                f,
                "  {}: {} images, {} analyzed, {} matched, {} moved, {} errors",
                dir.directory.display(),
                dir.total,
                dir.analyzed,
                dir.matched,
                dir.moved,
                dir.errors
            )?;
        }

        writeln!(f, "------------------------------------------")?;
        writeln!(
            f,
            "Total: {} images, {} analyzed, {} matched, {} moved, {} errors",
            self.total(),
            self.analyzed(),
            self.matched(),
            self.moved(),
            self.errors()
        )?;

        if !self.failures.is_empty() {
            writeln!(f, "\nFailures:")?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  [{:?}] {} ({}): {}",
                    failure.stage,
                    failure.image.display(),
                    failure.directory.display(),
                    failure.detail
                )?;
            }
        }

        if !self.sync_warnings.is_empty() {
            writeln!(f, "\nReference sync warnings:")?;
            for warning in &self.sync_warnings {
                writeln!(f, "  {}", warning)?;
            }
        }

        Ok(())
    }
}
