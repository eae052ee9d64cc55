//! Remote embedding backend.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint (DeepInfra by
//! default), one HTTP call per batch, requesting unit-normalised float
//! vectors. Each call is bounded by an overall deadline that covers every
//! retry; transient failures (connection errors, 408, 429, 5xx) are retried
//! with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::EmbeddingBackend;
use super::progress::{NoticeLevel, ProgressEvent, ProgressSink};
use super::types::{BackendInfo, BackendKind, remote_models};
use crate::error::{Error, Result};

/// Retry schedule for transient remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on each further failure.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome of a single failed HTTP attempt.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Worth retrying (connection error, 408, 429, 5xx)
    Transient(String),
    /// Not worth retrying (other 4xx)
    Rejected { status: u16, message: String },
    /// Response arrived but could not be used
    Malformed(String),
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
///
/// `on_retry` is called before each backoff sleep with the failed attempt
/// number (one-based), the error text and the delay.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
    mut on_retry: impl FnMut(u32, &str, Duration),
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Rejected { status, message }) => {
                return Err(Error::RemoteRejected { status, message });
            }
            Err(AttemptError::Malformed(message)) => return Err(Error::InvalidResponse(message)),
            Err(AttemptError::Transient(message)) => {
                if attempt + 1 < max_attempts {
                    let delay = policy.delay_for(attempt);
                    on_retry(attempt + 1, &message, delay);
                    tokio::time::sleep(delay).await;
                }
                last_error = message;
            }
        }
    }

    Err(Error::RemoteBatch {
        attempts: max_attempts,
        message: last_error,
    })
}

/// Options for [`RemoteBackend`].
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub priority: bool,
    pub max_connections: usize,
    pub retry: RetryPolicy,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            endpoint: remote_models::DEFAULT_ENDPOINT.to_string(),
            model: remote_models::default_config().name,
            api_key: None,
            timeout: Duration::from_secs(45),
            priority: false,
            max_connections: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Remote embedding backend.
pub struct RemoteBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
    timeout: Duration,
    priority: bool,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteBackend {
    /// Create a remote backend.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if no API key is configured, or `Config`
    /// if the HTTP client cannot be built.
    pub fn new(options: RemoteOptions) -> Result<Self> {
        let api_key = options
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::MissingCredential)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(options.max_connections.max(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let config = remote_models::get_config(&options.model);

        Ok(Self {
            client,
            endpoint: options.endpoint.trim_end_matches('/').to_string(),
            model: options.model,
            api_key,
            dimensions: config.dimensions,
            timeout: options.timeout,
            priority: options.priority,
            retry: options.retry,
        })
    }

    fn url(&self) -> String {
        format!("{}/embeddings", self.endpoint)
    }

    async fn send_once(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let request = EmbeddingsRequest::new(&self.model, texts, self.priority);

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {body}");
            return Err(
                if status.is_server_error()
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status == reqwest::StatusCode::REQUEST_TIMEOUT
                {
                    AttemptError::Transient(message)
                } else {
                    AttemptError::Rejected {
                        status: status.as_u16(),
                        message: body,
                    }
                },
            );
        }

        let data: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Malformed(format!("failed to parse response: {e}")))?;

        data.into_rows(texts.len()).map_err(AttemptError::Malformed)
    }
}

/// OpenAI-compatible embeddings request.
#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    normalize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_tier: Option<&'static str>,
}

impl<'a> EmbeddingsRequest<'a> {
    fn new(model: &'a str, input: &'a [String], priority: bool) -> Self {
        Self {
            model,
            input,
            encoding_format: "float",
            normalize: true,
            service_tier: priority.then_some("priority"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingsResponse {
    /// Order rows by their `index` field and check the count.
    fn into_rows(self, expected: usize) -> std::result::Result<Vec<Vec<f32>>, String> {
        if self.data.len() != expected {
            return Err(format!(
                "expected {expected} embeddings, got {}",
                self.data.len()
            ));
        }

        let mut data = self.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
            if data.iter().enumerate().any(|(i, d)| d.index != Some(i)) {
                return Err("response indices do not cover the request".to_string());
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingBackend for RemoteBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Remote,
            name: "deepinfra".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
        }
    }

    async fn embed(&self, texts: &[String], progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let started = std::time::Instant::now();
        let batch_len = texts.len();
        let max_attempts = self.retry.max_attempts;

        let call = retry_with_backoff(
            self.retry,
            || self.send_once(texts),
            |attempt, message, delay| {
                warn!(attempt, batch_len, ?delay, "Remote embedding attempt failed: {message}");
                progress.report(&ProgressEvent::notice(
                    NoticeLevel::Transient,
                    format!(
                        "Embedding API error (attempt {attempt}/{max_attempts}), retrying in {:.2}s: {message}",
                        delay.as_secs_f64()
                    ),
                ));
            },
        );

        let rows = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::RemoteTimeout {
                secs: self.timeout.as_secs(),
            })??;

        debug!(
            batch_len,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Remote embedding batch done"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options_with_key() -> RemoteOptions {
        RemoteOptions {
            api_key: Some("test-key".to_string()),
            ..RemoteOptions::default()
        }
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..7).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
        assert_eq!(policy.delay_for(40), Duration::from_secs(4));
    }

    #[test]
    fn test_missing_key_fails_fast() {
        let err = RemoteBackend::new(RemoteOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingCredential));

        let blank = RemoteOptions {
            api_key: Some("   ".to_string()),
            ..RemoteOptions::default()
        };
        assert!(matches!(RemoteBackend::new(blank), Err(Error::MissingCredential)));
    }

    #[test]
    fn test_backend_info_uses_model_registry() {
        let backend = RemoteBackend::new(RemoteOptions {
            model: "BAAI/bge-base-en-v1.5".to_string(),
            endpoint: "https://example.test/v1/openai/".to_string(),
            ..options_with_key()
        })
        .unwrap();
        let info = backend.info();
        assert_eq!(info.kind, BackendKind::Remote);
        assert_eq!(info.dimensions, 768);
        assert_eq!(backend.url(), "https://example.test/v1/openai/embeddings");
    }

    #[test]
    fn test_request_serialization() {
        let input = vec!["a".to_string(), "b".to_string()];
        let json = serde_json::to_value(EmbeddingsRequest::new("thenlper/gte-large", &input, false)).unwrap();
        assert_eq!(json["model"], "thenlper/gte-large");
        assert_eq!(json["encoding_format"], "float");
        assert_eq!(json["normalize"], true);
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
        assert!(json.get("service_tier").is_none());

        let json = serde_json::to_value(EmbeddingsRequest::new("m", &input, true)).unwrap();
        assert_eq!(json["service_tier"], "priority");
    }

    #[test]
    fn test_response_rows_are_reordered_by_index() {
        let response: EmbeddingsResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#,
        )
        .unwrap();
        let rows = response.into_rows(2).unwrap();
        assert_eq!(rows, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_count_mismatch_is_rejected() {
        let response: EmbeddingsResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0]}]}"#).unwrap();
        assert!(response.into_rows(2).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut retries = Vec::new();

        let result = retry_with_backoff(
            RetryPolicy::default(),
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AttemptError::Transient("HTTP 503".to_string()))
                } else {
                    Ok(vec![vec![1.0_f32]])
                }
            },
            |attempt, _, delay| retries.push((attempt, delay)),
        )
        .await
        .unwrap();

        assert_eq!(result, vec![vec![1.0]]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            retries,
            vec![(1, Duration::from_millis(250)), (2, Duration::from_millis(500))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry_with_backoff(
            RetryPolicy::default(),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AttemptError::Transient("connection refused".to_string()))
            },
            |_, _, _| {},
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match err {
            Error::RemoteBatch { attempts, message } => {
                assert_eq!(attempts, 5);
                assert_eq!(message, "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry_with_backoff(
            RetryPolicy::default(),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AttemptError::Rejected {
                    status: 401,
                    message: "invalid token".to_string(),
                })
            },
            |_, _, _| {},
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::RemoteRejected { status: 401, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_bounds_retries() {
        let slow = retry_with_backoff(
            RetryPolicy::default(),
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err::<(), _>(AttemptError::Transient("HTTP 504".to_string()))
            },
            |_, _, _| {},
        );
        let outcome = tokio::time::timeout(Duration::from_secs(45), slow).await;
        assert!(outcome.is_err(), "deadline should fire before the retries finish");
    }
}
