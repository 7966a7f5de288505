//! Outbound notification delivery for cmdpool.
//!
//! - [`WebhookDelivery`]: the [`Notifier`](cmdpool_core::Notifier) used by
//!   workers to POST lifecycle payloads, with optional retries on transport
//!   errors and 5xx responses.

pub mod delivery;

pub use delivery::webhook::{RetryOptions, WebhookDelivery, WebhookError};
