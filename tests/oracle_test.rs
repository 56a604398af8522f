// SPDX-License-Identifier: MIT

//! HTTP-level tests for the Ollama-backed oracle client.

use httpmock::prelude::*;
use serde_json::json;

use schedsift::oracle::{OllamaClient, OracleError, VisionOracle};

fn client_for(server: &MockServer) -> OllamaClient {
    OllamaClient::new(&server.base_url(), "moondream", 5).unwrap()
}

#[tokio::test]
async fn describe_image_returns_response_text() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"model": "moondream", "stream": false}"#);
            then.status(200)
                .json_body(json!({"response": "{\"is_schedule\": true}"}));
        })
        .await;

    let client = client_for(&server);
    let text = client
        .describe_image("prompt", "aGVsbG8=", "image/png")
        .await
        .unwrap();

    assert_eq!(text, "{\"is_schedule\": true}");
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_status_maps_to_rate_limited() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(429).body("slow down");
        })
        .await;

    let client = client_for(&server);
    let err = client
        .describe_image("prompt", "aGVsbG8=", "image/png")
        .await
        .unwrap_err();

    assert!(matches!(err, OracleError::RateLimited(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn auth_status_is_not_retryable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(401).body("who are you");
        })
        .await;

    let client = client_for(&server);
    let err = client
        .describe_image("prompt", "aGVsbG8=", "image/png")
        .await
        .unwrap_err();

    assert!(matches!(err, OracleError::Auth(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn missing_model_maps_to_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(404).body("model not found");
        })
        .await;

    let client = client_for(&server);
    let err = client
        .describe_image("prompt", "aGVsbG8=", "image/png")
        .await
        .unwrap_err();

    assert!(matches!(err, OracleError::NotFound(_)));
}

#[tokio::test]
async fn server_error_maps_to_transport() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(500).body("boom");
        })
        .await;

    let client = client_for(&server);
    let err = client
        .describe_image("prompt", "aGVsbG8=", "image/png")
        .await
        .unwrap_err();

    assert!(matches!(err, OracleError::Transport(_)));
}

#[tokio::test]
async fn health_check_and_model_listing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [{"name": "moondream:latest"}, {"name": "llava:7b"}]
            }));
        })
        .await;

    let client = client_for(&server);
    client.health_check().await.unwrap();
    assert!(client.model_available().await.unwrap());

    let models = client.list_models().await.unwrap();
    assert_eq!(models, vec!["moondream:latest", "llava:7b"]);
}

#[tokio::test]
async fn unreachable_oracle_fails_health_check() {
    // Port 9 (discard) is never an HTTP server.
    let client = OllamaClient::new("http://127.0.0.1:9", "moondream", 1).unwrap();
    assert!(client.health_check().await.is_err());
}

#[tokio::test]
async fn slow_response_hits_configured_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .delay(std::time::Duration::from_secs(3))
                .json_body(json!({"response": "late"}));
        })
        .await;

    let client = OllamaClient::new(&server.base_url(), "moondream", 1).unwrap();
    let err = client
        .describe_image("prompt", "aGVsbG8=", "image/png")
        .await
        .unwrap_err();

    assert!(matches!(err, OracleError::Timeout(_)));
}
