// SPDX-License-Identifier: MIT

//! Classification of one image into a structured verdict
//!
//! Wraps the vision oracle with prompt construction, free-form response
//! parsing and retry with exponential backoff. The oracle's output is an
//! untrusted text stream: the JSON object is cut out between the first `{`
//! and the last `}` after stripping any code fence, and every field is
//! coerced defensively.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::normalizer;
use crate::oracle::{OracleError, VisionOracle};

/// Content category reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Table,
    Chart,
    Diagram,
    Form,
    Schedule,
    Text,
    Logo,
    Other,
}

impl Category {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "table" => Category::Table,
            "chart" => Category::Chart,
            "diagram" => Category::Diagram,
            "form" => Category::Form,
            "schedule" | "timetable" => Category::Schedule,
            "text" => Category::Text,
            "logo" => Category::Logo,
            _ => Category::Other,
        }
    }
}

/// Outcome of classifying one image, after retries resolve.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub is_match: bool,
    pub confidence: f64,
    pub category: Category,
    pub description: String,
    pub reasoning: String,
    pub succeeded: bool,
    pub error_detail: Option<String>,
    pub attempts_used: u32,
}

impl Verdict {
    fn failure(detail: String, attempts_used: u32) -> Self {
        Self {
            is_match: false,
            confidence: 0.0,
            category: Category::Other,
            description: String::new(),
            reasoning: String::new(),
            succeeded: false,
            error_detail: Some(detail),
            attempts_used,
        }
    }

    /// Positive match at or above the given confidence threshold.
    pub fn is_positive(&self, threshold: f64) -> bool {
        self.succeeded && self.is_match && self.confidence >= threshold
    }
}

/// Retry ceiling and backoff bases; state during a call is a plain loop
/// counter, nothing lives across calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt after `attempt` (1-based), doubling each
    /// time; rate-limit failures use the larger base.
    fn delay_after(&self, attempt: u32, rate_limited: bool) -> Duration {
        let base = if rate_limited {
            self.rate_limit_backoff
        } else {
            self.backoff
        };
        base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Classifies images as schedule-like or not via a [`VisionOracle`].
pub struct ScheduleClassifier {
    oracle: Arc<dyn VisionOracle>,
    prompt: String,
    policy: RetryPolicy,
    max_dimension: u32,
}

impl ScheduleClassifier {
    pub fn new(
        oracle: Arc<dyn VisionOracle>,
        prompt: String,
        policy: RetryPolicy,
        max_dimension: u32,
    ) -> Self {
        Self {
            oracle,
            prompt,
            policy,
            max_dimension,
        }
    }

    /// Classify one image file. Never returns an error: every failure mode
    /// collapses into a verdict with `succeeded = false` so the batch can
    /// continue.
    pub async fn classify(&self, path: &Path) -> Verdict {
        let prepared = match normalizer::prepare(path, self.max_dimension) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Cannot prepare {:?}: {}", path, e);
                return Verdict::failure(format!("conversion failed: {}", e), 0);
            }
        };

        let image_base64 = general_purpose::STANDARD.encode(&prepared.bytes);

        for attempt in 1..=self.policy.max_attempts {
            let response = self
                .oracle
                .describe_image(&self.prompt, &image_base64, prepared.mime_type)
                .await;

            let (detail, rate_limited) = match response {
                Ok(text) => match parse_verdict(&text) {
                    Ok(mut verdict) => {
                        verdict.attempts_used = attempt;
                        return verdict;
                    }
                    Err(parse_error) => {
                        debug!("Attempt {} for {:?}: {}", attempt, path, parse_error);
                        (parse_error, false)
                    }
                },
                Err(e) if !e.is_retryable() => {
                    warn!("Giving up on {:?}: {}", path, e);
                    return Verdict::failure(e.to_string(), attempt);
                }
                Err(e) => {
                    debug!("Attempt {} for {:?}: {}", attempt, path, e);
                    (e.to_string(), matches!(e, OracleError::RateLimited(_)))
                }
            };

            if attempt == self.policy.max_attempts {
                return Verdict::failure(detail, attempt);
            }

            let delay = self.policy.delay_after(attempt, rate_limited);
            debug!("Retrying {:?} in {:?}", path, delay);
            tokio::time::sleep(delay).await;
        }

        // max_attempts >= 1 makes the loop return before falling through.
        Verdict::failure("no attempts configured".to_string(), 0)
    }
}

/// Cut the JSON object out of a free-form response: drop any code fence,
/// then take everything between the first `{` and the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}

/// Decode the verdict JSON, coercing loosely typed fields. A missing
/// `is_schedule` or `confidence` is a parse error, not a default.
fn parse_verdict(text: &str) -> std::result::Result<Verdict, String> {
    let json = extract_json_object(text).ok_or("no JSON object in response")?;

    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("malformed JSON: {}", e))?;

    let obj = value.as_object().ok_or("response is not a JSON object")?;

    let is_match = obj
        .get("is_schedule")
        .and_then(coerce_bool)
        .ok_or("missing or invalid is_schedule")?;

    let confidence = obj
        .get("confidence")
        .and_then(coerce_f64)
        .ok_or("missing or invalid confidence")?
        .clamp(0.0, 1.0);

    let category = obj
        .get("type")
        .and_then(|v| v.as_str())
        .map(Category::parse)
        .unwrap_or(Category::Other);

    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let reasoning = obj
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(Verdict {
        is_match,
        confidence,
        category,
        description,
        reasoning,
        succeeded: true,
        error_detail: None,
        attempts_used: 0,
    })
}

fn coerce_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{ImageBuffer, Rgb};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Oracle stub that replays a scripted sequence of responses.
    struct ScriptedOracle {
        responses: Mutex<VecDeque<std::result::Result<String, OracleError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<std::result::Result<String, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl VisionOracle for ScriptedOracle {
        async fn describe_image(
            &self,
            _prompt: &str,
            _image_base64: &str,
            _mime_type: &str,
        ) -> std::result::Result<String, OracleError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(OracleError::Transport("script exhausted".into())))
        }
    }

    fn zero_delay_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
        }
    }

    fn classifier_with(oracle: Arc<dyn VisionOracle>, max_attempts: u32) -> ScheduleClassifier {
        ScheduleClassifier::new(oracle, "classify".into(), zero_delay_policy(max_attempts), 1024)
    }

    fn fixture_image(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("img.png");
        let img = ImageBuffer::from_pixel(4, 4, Rgb::<u8>([1, 2, 3]));
        img.save(&path).unwrap();
        path
    }

    fn good_response() -> String {
        r#"{"is_schedule": true, "confidence": 0.92, "type": "table",
            "description": "A class timetable", "reasoning": "Grid with times"}"#
            .to_string()
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Sure! Here you go:\n```json\n{\"a\": 1}\n```\nHope that helps.";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn extracts_bare_json_with_prose() {
        let text = "The verdict is {\"is_schedule\": false} as requested";
        assert_eq!(extract_json_object(text), Some("{\"is_schedule\": false}"));
    }

    #[test]
    fn parse_coerces_string_bool_and_clamps_confidence() {
        let verdict = parse_verdict(
            r#"{"is_schedule": "true", "confidence": 1.7, "type": "timetable"}"#,
        )
        .unwrap();
        assert!(verdict.is_match);
        assert_eq!(verdict.confidence, 1.0);
        assert_eq!(verdict.category, Category::Schedule);
        assert!(verdict.succeeded);
    }

    #[test]
    fn parse_rejects_missing_required_fields() {
        assert!(parse_verdict(r#"{"confidence": 0.5}"#).is_err());
        assert!(parse_verdict(r#"{"is_schedule": true}"#).is_err());
        assert!(parse_verdict("no json here").is_err());
    }

    #[test]
    fn unknown_category_maps_to_other() {
        let verdict =
            parse_verdict(r#"{"is_schedule": false, "confidence": 0.2, "type": "meme"}"#).unwrap();
        assert_eq!(verdict.category, Category::Other);
    }

    #[test]
    fn backoff_doubles_and_rate_limit_uses_larger_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1, false), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2, false), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3, false), Duration::from_secs(4));
        assert_eq!(policy.delay_after(1, true), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2, true), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_image(&dir);
        let oracle = ScriptedOracle::new(vec![Ok(good_response())]);
        let classifier = classifier_with(oracle.clone(), 3);

        let verdict = classifier.classify(&path).await;
        assert!(verdict.succeeded);
        assert!(verdict.is_match);
        assert_eq!(verdict.attempts_used, 1);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_responses_exhaust_exactly_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_image(&dir);
        let oracle = ScriptedOracle::new(vec![
            Ok("garbage".into()),
            Ok("still garbage".into()),
            Ok("garbage forever".into()),
            Ok(good_response()),
        ]);
        let classifier = classifier_with(oracle.clone(), 3);

        let verdict = classifier.classify(&path).await;
        assert!(!verdict.succeeded);
        assert!(!verdict.is_match);
        assert_eq!(verdict.attempts_used, 3);
        assert_eq!(oracle.calls(), 3);
        assert!(verdict.error_detail.is_some());
    }

    #[tokio::test]
    async fn transient_failure_then_success_reports_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_image(&dir);
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Transport("connection reset".into())),
            Ok("not json".into()),
            Ok(good_response()),
        ]);
        let classifier = classifier_with(oracle.clone(), 3);

        let verdict = classifier.classify(&path).await;
        assert!(verdict.succeeded);
        assert_eq!(verdict.attempts_used, 3);
    }

    #[tokio::test]
    async fn auth_error_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_image(&dir);
        let oracle = ScriptedOracle::new(vec![Err(OracleError::Auth("bad key".into()))]);
        let classifier = classifier_with(oracle.clone(), 3);

        let verdict = classifier.classify(&path).await;
        assert!(!verdict.succeeded);
        assert_eq!(verdict.attempts_used, 1);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn unreadable_image_is_a_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"nope").unwrap();
        let oracle = ScriptedOracle::new(vec![Ok(good_response())]);
        let classifier = classifier_with(oracle.clone(), 3);

        let verdict = classifier.classify(&path).await;
        assert!(!verdict.succeeded);
        assert_eq!(verdict.attempts_used, 0);
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn positive_match_respects_threshold() {
        let mut verdict = parse_verdict(&good_response()).unwrap();
        assert!(verdict.is_positive(0.7));
        verdict.confidence = 0.5;
        assert!(!verdict.is_positive(0.7));
        verdict.succeeded = false;
        assert!(!verdict.is_positive(0.0));
    }
}
