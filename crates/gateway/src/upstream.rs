use std::time::{Duration, Instant};

use pitwall_contracts::ResourceQuery;
use serde::de::DeserializeOwned;

use crate::clock::SharedClock;
use crate::rate_limit::RequestBudget;

#[derive(Debug)]
pub enum UpstreamError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse,
    RateLimited,
}

impl UpstreamError {
    pub fn outcome(&self) -> &'static str {
        match self {
            UpstreamError::Timeout => "timeout",
            UpstreamError::Http(_) => "http_error",
            UpstreamError::BadStatus(_) => "bad_status",
            UpstreamError::InvalidResponse => "invalid_response",
            UpstreamError::RateLimited => "rate_limited",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::Http(_) => true,
            // 429 is never retried.
            UpstreamError::BadStatus(status) => status.is_server_error(),
            UpstreamError::InvalidResponse | UpstreamError::RateLimited => false,
        }
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Timeout => write!(f, "upstream request timed out"),
            UpstreamError::Http(err) => write!(f, "upstream HTTP error: {}", err),
            UpstreamError::BadStatus(status) => write!(f, "upstream returned status {}", status),
            UpstreamError::InvalidResponse => {
                write!(f, "upstream returned a body that is not a JSON array")
            }
            UpstreamError::RateLimited => write!(f, "local upstream request budget exhausted"),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<reqwest::Error> for UpstreamError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Http(value)
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_backoff: Duration,
    pub rate_limit_per_window: u32,
    pub rate_limit_window: Duration,
}

/// HTTP client for the telemetry feed.
///
/// Every fetch returns the complete decoded array or an error; a body that cannot be read
/// to the end is reported as an error rather than a short list.
#[derive(Clone)]
pub struct UpstreamClient {
    base_url: String,
    http: reqwest::Client,
    retry_max_attempts: u32,
    retry_base_backoff: Duration,
    budget: RequestBudget,
}

impl UpstreamClient {
    pub fn new(config: UpstreamClientConfig, clock: SharedClock) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(UpstreamError::Http)?;

        Ok(Self {
            base_url: config.base_url,
            http,
            retry_max_attempts: config.retry_max_attempts,
            retry_base_backoff: config.retry_base_backoff,
            budget: RequestBudget::new(
                config.rate_limit_per_window,
                config.rate_limit_window,
                clock,
            ),
        })
    }

    /// Fetches the raw records behind `query`, plus any extra upstream parameters.
    pub async fn fetch_query(
        &self,
        query: &ResourceQuery,
        extra: &[(&'static str, String)],
    ) -> Result<Vec<serde_json::Value>, UpstreamError> {
        let mut params = query.params();
        params.extend(extra.iter().cloned());
        self.fetch(query.resource.upstream_path(), &params).await
    }

    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<Vec<T>, UpstreamError> {
        self.fetch(path, params)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(|_| UpstreamError::InvalidResponse))
            .collect()
    }

    pub async fn fetch(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<Vec<serde_json::Value>, UpstreamError> {
        let url = self.resource_url(path);
        let mut attempt = 0u32;
        loop {
            // Every attempt, retries included, spends one slot of the local budget.
            if !self.budget.try_acquire() {
                crate::metrics::observe_upstream_call(path, UpstreamError::RateLimited.outcome());
                tracing::warn!(path, attempt, "upstream.budget_exhausted");
                return Err(UpstreamError::RateLimited);
            }

            let started = Instant::now();
            let result = self.fetch_once(&url, params).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(records) => {
                    crate::metrics::observe_upstream_call(path, "success");
                    tracing::debug!(
                        path,
                        attempt,
                        latency_ms,
                        records = records.len(),
                        budget_remaining = ?self.budget.remaining(),
                        "upstream.fetch"
                    );
                    return Ok(records);
                }
                Err(err) => {
                    crate::metrics::observe_upstream_call(path, err.outcome());
                    if attempt >= self.retry_max_attempts || !err.is_retryable() {
                        tracing::warn!(path, attempt, latency_ms, error = %err, "upstream.fetch_failed");
                        return Err(err);
                    }

                    let backoff = self.backoff_for(attempt);
                    tracing::debug!(
                        path,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "upstream.retry"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<Vec<serde_json::Value>, UpstreamError> {
        let resp = self.http.get(url).query(params).send().await?;

        if !resp.status().is_success() {
            return Err(UpstreamError::BadStatus(resp.status()));
        }

        let body = resp.json::<serde_json::Value>().await.map_err(|err| {
            if err.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::InvalidResponse
            }
        })?;

        match body {
            serde_json::Value::Array(records) => Ok(records),
            _ => Err(UpstreamError::InvalidResponse),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_base_backoff
            .saturating_mul(1u32 << attempt.min(10))
    }

    fn resource_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}
