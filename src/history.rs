// SPDX-License-Identifier: MIT

//! Move log: JSONL record of every relocation, for auditing and undo

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::classifier::Category;
use crate::Result;

/// A single relocation in the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    pub category: Category,
    pub confidence: f64,
    /// blake3 hash of the file content at move time
    pub file_hash: String,
    /// Reference documents rewritten after this move
    pub documents_updated: Vec<PathBuf>,
    pub undone: bool,
}

/// Append-only move log with undo marking
pub struct MoveLog {
    path: PathBuf,
}

impl MoveLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a record to the log
    pub fn append(&self, record: &MoveRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all records
    pub fn read_all(&self) -> Result<Vec<MoveRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Failed to parse move record: {}", e);
                }
            }
        }

        Ok(records)
    }

    /// Get the most recent N records (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<MoveRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    /// Mark a record as undone
    pub fn mark_undone(&self, id: &str) -> Result<()> {
        let records = self.read_all()?;

        // Rewrite the entire file with the updated record
        let file = File::create(&self.path)?;
        let mut writer = std::io::BufWriter::new(file);

        for mut record in records {
            if record.id == id {
                record.undone = true;
            }
            let json = serde_json::to_string(&record)?;
            writeln!(writer, "{}", json)?;
        }

        Ok(())
    }

    /// Get records that haven't been undone
    pub fn get_undoable(&self) -> Result<Vec<MoveRecord>> {
        let records = self.read_all()?;
        Ok(records.into_iter().filter(|r| !r.undone).collect())
    }

    /// Clear the log
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Build a move record for a relocation that just happened
pub fn create_record(
    original_path: PathBuf,
    new_path: PathBuf,
    category: Category,
    confidence: f64,
    file_hash: String,
    documents_updated: Vec<PathBuf>,
) -> MoveRecord {
    MoveRecord {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        original_path,
        new_path,
        category,
        confidence,
        file_hash,
        documents_updated,
        undone: false,
    }
}

/// blake3 hash of a file's content, recorded so undo can detect drift
pub fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}
