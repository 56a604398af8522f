// SPDX-License-Identifier: MIT

//! Vision oracle capability and its Ollama-backed implementation
//!
//! The pipeline only depends on the [`VisionOracle`] trait so that tests can
//! substitute a deterministic stub. [`OllamaClient`] is the production
//! implementation, talking to a local Ollama instance.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::{Result, SchedsiftError};

/// Transport-level failure classes; retry behavior hangs off these.
#[derive(Error, Debug, Clone)]
pub enum OracleError {
    /// Rate limit or quota exhaustion; retried with a longer backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Authentication or permission failure; never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Model or endpoint missing; never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request exceeded its deadline; retried with standard backoff.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Any other transport failure; retried with standard backoff.
    #[error("transport error: {0}")]
    Transport(String),
}

impl OracleError {
    /// Whether the retry loop should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::Auth(_) | OracleError::NotFound(_))
    }
}

/// Capability to describe one image; the only seam the pipeline sees.
#[async_trait]
pub trait VisionOracle: Send + Sync {
    /// Send one image with an instruction prompt, returning the raw,
    /// untrusted text response.
    async fn describe_image(
        &self,
        prompt: &str,
        image_base64: &str,
        mime_type: &str,
    ) -> std::result::Result<String, OracleError>;
}

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client with a per-request timeout.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self {
            client,
            base_url,
            model: model.to_string(),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                SchedsiftError::OracleUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if the configured model is available
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| m.starts_with(&self.model) || *m == format!("{}:latest", self.model)))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn classify_status(status: StatusCode, body: &str) -> OracleError {
        let detail = format!("status {}: {}", status, body.chars().take(200).collect::<String>());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OracleError::Auth(detail),
            StatusCode::NOT_FOUND => OracleError::NotFound(detail),
            StatusCode::TOO_MANY_REQUESTS => OracleError::RateLimited(detail),
            _ => OracleError::Transport(detail),
        }
    }
}

#[async_trait]
impl VisionOracle for OllamaClient {
    async fn describe_image(
        &self,
        prompt: &str,
        image_base64: &str,
        _mime_type: &str,
    ) -> std::result::Result<String, OracleError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            images: Some(vec![image_base64.to_string()]),
        };

        debug!("Sending vision request to Ollama: model={}", self.model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(e.to_string())
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Transport(format!("invalid response body: {}", e)))?;

        Ok(result.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_not_found_are_not_retryable() {
        assert!(!OracleError::Auth("x".into()).is_retryable());
        assert!(!OracleError::NotFound("x".into()).is_retryable());
        assert!(OracleError::RateLimited("x".into()).is_retryable());
        assert!(OracleError::Timeout("x".into()).is_retryable());
        assert!(OracleError::Transport("x".into()).is_retryable());
    }

    #[test]
    fn status_codes_map_to_error_classes() {
        assert!(matches!(
            OllamaClient::classify_status(StatusCode::UNAUTHORIZED, ""),
            OracleError::Auth(_)
        ));
        assert!(matches!(
            OllamaClient::classify_status(StatusCode::NOT_FOUND, ""),
            OracleError::NotFound(_)
        ));
        assert!(matches!(
            OllamaClient::classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            OracleError::RateLimited(_)
        ));
        assert!(matches!(
            OllamaClient::classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            OracleError::Transport(_)
        ));
    }

    #[test]
    fn url_is_normalized() {
        let client =
            OllamaClient::new("http://localhost:11434/api/generate/", "moondream", 5).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
