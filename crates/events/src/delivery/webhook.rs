//! Webhook delivery over HTTP POST.
//!
//! [`WebhookDelivery`] sends a JSON-encoded payload to an external URL.
//! By default a single attempt is made; with [`RetryOptions`] transport
//! failures and 5xx responses are retried with exponential waits. Any non-2xx
//! final answer is an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use cmdpool_core::{Notifier, NotifyError, Payload};

/// Default HTTP request timeout for a single delivery attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The payload could not be encoded as JSON.
    #[error("Failed to encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

impl WebhookError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::Encode(_) => false,
            WebhookError::Request(_) => true,
            WebhookError::HttpStatus(status) => *status >= 500,
        }
    }
}

impl From<WebhookError> for NotifyError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::HttpStatus(status) => NotifyError::HttpStatus(status),
            other => NotifyError::Transport(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryOptions
// ---------------------------------------------------------------------------

/// Retry policy for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the first attempt.
    pub max: u32,
    /// Wait before the first retry.
    pub wait_min: Duration,
    /// Upper bound on the wait between retries.
    pub wait_max: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max: 4,
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(30),
        }
    }
}

impl RetryOptions {
    /// Wait before retry number `attempt` (0-based): `wait_min * 2^attempt`,
    /// clamped to `wait_max`.
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.wait_min.saturating_mul(factor).min(self.wait_max)
    }
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers lifecycle payloads to external webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    retry: Option<RetryOptions>,
}

impl WebhookDelivery {
    /// Create a delivery service whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            retry: None,
        })
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            retry: None,
        }
    }

    /// Retry transport errors and 5xx responses according to `retry`.
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// POST `body` as JSON to `url` and return the response status.
    pub async fn deliver<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> Result<u16, WebhookError> {
        let json = serde_json::to_vec(body)?;
        let max_retries = self.retry.map_or(0, |r| r.max);
        let mut attempt = 0u32;

        loop {
            match self.try_send(url, &json, headers).await {
                Ok(status) => return Ok(status),
                Err(e) if attempt < max_retries && e.is_retryable() => {
                    let wait = self.retry.map(|r| r.wait_for(attempt)).unwrap_or_default();
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    if max_retries > 0 {
                        tracing::error!(
                            url,
                            error = %e,
                            attempts = attempt + 1,
                            "Webhook delivery failed after retries"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(
        &self,
        url: &str,
        json: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<u16, WebhookError> {
        let mut request = self.client.post(url).body(json.to_vec());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::HttpStatus(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl Notifier for WebhookDelivery {
    async fn post(
        &self,
        url: &str,
        payload: &Payload,
        headers: &[(&str, &str)],
    ) -> Result<u16, NotifyError> {
        Ok(self.deliver(url, payload, headers).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
