//! REST client for the coordinator HTTP endpoints.
//!
//! Wraps job claiming, payload download, result updates, metric upload
//! and the worker heartbeat using [`reqwest`]. Every request carries the
//! worker token as a bearer credential. Requests that fail to connect
//! are retried with exponential backoff before the error is surfaced.

use std::time::Duration;

use aibrush_core::job::{Job, JobUpdate};
use aibrush_core::metric::MetricEvent;
use aibrush_core::model::ModelKind;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::{Coordinator, PayloadKind};
use crate::error::CoordinatorError;

/// Connection retry policy for outgoing requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffConfig {
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(32),
                multiplier: 2.0,
            },
        }
    }
}

/// Per-request deadlines. A coordinator that accepts a connection and
/// never answers surfaces as a timeout instead of wedging the caller.
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    /// Whole request, from connect to the last body byte.
    pub request: Duration,
    pub connect: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            connect: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct ClaimRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'static str>,
}

/// HTTP client for the coordinator.
pub struct CoordinatorApi {
    client: reqwest::Client,
    api_url: String,
    token: String,
    retry: RetryPolicy,
}

impl CoordinatorApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://www.aibrush.art`.
    /// * `token`   - Worker credential sent on every request.
    /// * `timeouts` - Request and connect deadlines.
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, CoordinatorError> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.request)
            .connect_timeout(timeouts.connect)
            .build()?;
        Ok(Self::with_client(client, api_url, token))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    // ---- private helpers ----

    /// Send the request built by `build`, retrying connection failures.
    ///
    /// `build` is called once per attempt since a sent request builder
    /// is consumed.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response, CoordinatorError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut backoff = Backoff::new(self.retry.backoff.clone());
        let mut attempt = 1;
        loop {
            let request = build(&self.client).bearer_auth(&self.token);
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < self.retry.max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Coordinator connection failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`CoordinatorError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CoordinatorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CoordinatorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CoordinatorError> {
        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), CoordinatorError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Coordinator for CoordinatorApi {
    async fn claim_job(&self, model: Option<ModelKind>) -> Result<Option<Job>, CoordinatorError> {
        let url = self.url("/api/process-image");
        let body = ClaimRequest {
            model: model.map(|m| m.as_str()),
        };
        let response = self.send(|c| c.put(&url).json(&body)).await?;
        let response = Self::ensure_success(response).await?;

        // The coordinator answers `null` (or nothing) when the queue is empty.
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(serde_json::from_str::<Option<Job>>(&text)?)
    }

    async fn fetch_payload(
        &self,
        job_id: &str,
        kind: PayloadKind,
    ) -> Result<Option<Vec<u8>>, CoordinatorError> {
        let url = self.url(&format!("/api/images/{job_id}.{}.jpg", kind.as_str()));
        let response = self.send(|c| c.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(job_id, payload = kind.as_str(), "No payload for job");
            return Ok(None);
        }
        let response = Self::ensure_success(response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn update_job(&self, update: &JobUpdate) -> Result<Job, CoordinatorError> {
        let url = self.url(&format!("/api/images/{}", update.id));
        let response = self.send(|c| c.patch(&url).json(update)).await?;
        Self::parse_response(response).await
    }

    async fn push_metrics(&self, batch: &[MetricEvent]) -> Result<(), CoordinatorError> {
        let url = self.url("/api/metrics");
        let response = self.send(|c| c.post(&url).json(batch)).await?;
        Self::check_status(response).await
    }

    async fn ping(&self) -> Result<(), CoordinatorError> {
        let url = self.url("/api/worker-ping");
        let response = self.send(|c| c.post(&url)).await?;
        Self::check_status(response).await
    }
}
