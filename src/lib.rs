// SPDX-License-Identifier: MIT

//! schedsift: schedule-image classification and relocation
//!
//! Walks a directory tree for image-bearing folders, classifies each image
//! with a local vision model, and moves schedule-like content (tables,
//! charts, forms, diagrams) into a dedicated subtree while keeping sibling
//! reference documents pointing at the right place.

pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod normalizer;
pub mod oracle;
pub mod pipeline;
pub mod relocate;
pub mod report;
pub mod scanner;
pub mod sync;

pub use config::AppConfig;
pub use error::{Result, SchedsiftError};
