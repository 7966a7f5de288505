//! Outbound webhook contract used by the worker.

use async_trait::async_trait;

use crate::error::NotifyError;
use crate::state::Payload;

/// Headers sent with every lifecycle webhook.
pub const WEBHOOK_HEADERS: [(&str, &str); 2] =
    [("Content-Type", "application/json"), ("Accept", "*/*")];

/// POSTs a JSON payload to a webhook URL.
///
/// Returns the response status on success. Non-2xx responses must be
/// reported as [`NotifyError::HttpStatus`] so callers treat them exactly like
/// transport failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(
        &self,
        url: &str,
        payload: &Payload,
        headers: &[(&str, &str)],
    ) -> Result<u16, NotifyError>;
}
