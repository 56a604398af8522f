// SPDX-License-Identifier: MIT

//! Configuration management for schedsift

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directory scanning settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// Vision oracle settings
    pub oracle: OracleConfig,

    /// Classification and relocation rules
    #[serde(default)]
    pub rules: RuleConfig,

    /// Prompt template sent with every image
    #[serde(default = "default_classify_prompt")]
    pub prompt: String,

    /// Path of the JSONL move log
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    /// Case-insensitive token a directory name must contain to be a candidate
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Recognized image file extensions
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Extensions of sibling documents whose references are rewritten
    #[serde(default = "default_reference_extensions")]
    pub reference_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OracleConfig {
    pub url: String,
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff for parse and transport retries, doubled per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Larger base backoff for rate-limit retries
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    /// Pacing delay between successive classification calls
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    /// Minimum confidence for a positive verdict to trigger a move
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,

    /// Destination subtree components, created under the group's parent
    #[serde(default = "default_destination")]
    pub destination: Vec<String>,

    /// Longest side in pixels submitted to the oracle
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

// Default value functions
fn default_marker() -> String { "image".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 1_000 }
fn default_rate_limit_backoff_ms() -> u64 { 5_000 }
fn default_pacing_ms() -> u64 { 500 }
fn default_threshold() -> f64 { 0.7 }
fn default_max_dimension() -> u32 { 1024 }
fn default_history_path() -> String { "schedsift_history.jsonl".to_string() }

fn default_destination() -> Vec<String> {
    vec!["schedules", "Schedules", "images"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_image_extensions() -> Vec<String> {
    vec!["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff", "svg"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_reference_extensions() -> Vec<String> {
    vec!["html", "htm", "json", "md"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_classify_prompt() -> String {
    "Look at this image and decide whether it shows structured, organizational \
     content such as a timetable, schedule, table, chart, form or diagram, as \
     opposed to decorative or unstructured content such as photos or logos. \
     Respond with ONLY a JSON object with these fields: \
     \"is_schedule\" (boolean), \"confidence\" (number between 0 and 1), \
     \"type\" (one of: table, chart, diagram, form, schedule, text, logo, other), \
     \"description\" (one sentence), \"reasoning\" (one sentence)."
        .to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            image_extensions: default_image_extensions(),
            reference_extensions: default_reference_extensions(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_threshold(),
            destination: default_destination(),
            max_dimension: default_max_dimension(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            oracle: OracleConfig {
                url: "http://localhost:11434".to_string(),
                model: "moondream".to_string(),
                timeout_secs: default_timeout(),
                max_attempts: default_max_attempts(),
                backoff_ms: default_backoff_ms(),
                rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
                pacing_ms: default_pacing_ms(),
            },
            rules: RuleConfig::default(),
            prompt: default_classify_prompt(),
            history_path: default_history_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::SchedsiftError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
