// SPDX-License-Identifier: MIT

//! Error types for schedsift

use thiserror::Error;

/// Result type alias for schedsift operations
pub type Result<T> = std::result::Result<T, SchedsiftError>;

/// schedsift error types
#[derive(Error, Debug)]
pub enum SchedsiftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Oracle not available: {0}")]
    OracleUnavailable(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Relocation error: {0}")]
    Relocation(String),
}
