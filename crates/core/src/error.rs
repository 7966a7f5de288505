/// Errors raised while resolving or dispatching a command.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid command operation: {0}")]
    InvalidOperation(String),

    #[error("Command {command_id} has no resolvable job type")]
    UnresolvedJob { command_id: u64 },
}

/// Business error returned by a job's lifecycle operation.
///
/// Any variant counts as a failed attempt and is retried by the worker up to
/// the command's `max_retries`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The request to the remote system could not be completed.
    #[error("Job request failed: {0}")]
    Request(String),

    /// The remote system answered with a non-2xx status.
    #[error("Remote rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The remote system reported a state this job cannot map.
    #[error("Unknown remote state: {0}")]
    UnknownState(String),

    /// The job is missing data required for the requested operation.
    #[error("Job is not ready: {0}")]
    NotReady(String),
}

/// Errors from a [`Codec`](crate::codec::Codec) implementation.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode command: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors from a [`Notifier`](crate::notify::Notifier) implementation.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The webhook endpoint answered with a non-2xx status.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    /// The request never produced a response (network, DNS, timeout, ...).
    #[error("Webhook request failed: {0}")]
    Transport(String),
}
