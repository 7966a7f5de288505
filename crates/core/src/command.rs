//! The command abstraction: identity, pluggable job type and run metadata.
//!
//! A [`Command`] is what travels through a worker's shard. Its [`Job`] is
//! the deployment-specific part (how to create, poll and cancel the remote
//! work); its [`RunInfo`] is the bookkeeping the worker mutates between
//! attempts. Both must survive a trip through the
//! [`Codec`](crate::codec::Codec).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, JobError};
use crate::state::{State, Status};

/// Callback event fired when a command is first seen pending.
pub const CALLBACK_STARTED: &str = "started";

/// Optional callback event fired when a command is first seen running.
pub const CALLBACK_RUNNING: &str = "running";

/// Callback event fired once a command reaches a terminal state.
pub const CALLBACK_FINISHED: &str = "finished";

/// Operation set on a command before it is re-queued for another poll.
pub const OPERATION_STATUS: &str = "status";

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Lifecycle verb requested by [`RunInfo::operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Get,
    Delete,
}

impl Operation {
    /// Parse a verb case-insensitively.
    ///
    /// `run`/`create`, `status`/`get` and `cancel`/`delete` are accepted;
    /// anything else is rejected.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.to_lowercase().as_str() {
            "run" | "create" => Ok(Operation::Create),
            "status" | "get" => Ok(Operation::Get),
            "cancel" | "delete" => Ok(Operation::Delete),
            other => Err(CoreError::InvalidOperation(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RunInfo
// ---------------------------------------------------------------------------

/// Mutable execution metadata attached to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunInfo {
    /// Requested lifecycle verb, e.g. `"create"` or `"status"`.
    pub operation: String,
    /// Verb the command was first dispatched with.
    pub start_operation: Option<String>,
    /// Last state a notification was successfully recorded for.
    pub current_state: Option<State>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub exit_code: i32,
    /// Lifecycle event name to webhook URL.
    pub callbacks: BTreeMap<String, String>,
    pub pending_hook: String,
    pub running_hook: String,
    pub finish_hook: String,
}

impl RunInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Register a webhook URL for a lifecycle event.
    pub fn with_callback(mut self, event: impl Into<String>, url: impl Into<String>) -> Self {
        self.callbacks.insert(event.into(), url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Webhook URL registered for `event`, or an empty string.
    pub fn callback(&self, event: &str) -> String {
        self.callbacks.get(event).cloned().unwrap_or_default()
    }

    /// Verb the command was first dispatched with, falling back to the
    /// current operation before the first dispatch.
    pub fn start_operation(&self) -> &str {
        self.start_operation.as_deref().unwrap_or(&self.operation)
    }

    pub fn is_finished(&self, state: State) -> bool {
        state.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Context a worker injects into a job right before dispatching it.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Command id rendered as text, for use in remote requests and logs.
    pub command_id: String,
    /// The owning worker's span; jobs log inside it.
    pub span: tracing::Span,
}

impl JobContext {
    pub fn new(command_id: impl Into<String>, span: tracing::Span) -> Self {
        Self {
            command_id: command_id.into(),
            span,
        }
    }
}

/// Capability set every concrete job type exposes.
#[async_trait]
pub trait Job: Send + fmt::Debug {
    /// Receive the worker-provided context. Called before every operation.
    fn bind(&mut self, _ctx: JobContext) {}

    /// Submit the work to the remote system.
    async fn create(&mut self) -> Result<Status, JobError>;

    /// Poll the remote system. `start_operation` is the verb the command was
    /// first dispatched with.
    async fn get(&mut self, start_operation: &str) -> Result<Status, JobError>;

    /// Cancel the remote work.
    async fn delete(&mut self) -> Result<Status, JobError>;
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// An opaque job descriptor owned by exactly one worker at a time.
pub trait Command: Send + fmt::Debug + 'static {
    /// Stable identifier; drives shard routing.
    fn id(&self) -> u64;

    /// Resolve the concrete job type.
    fn job_mut(&mut self) -> Result<&mut dyn Job, CoreError>;

    fn run_info(&self) -> &RunInfo;

    fn run_info_mut(&mut self) -> &mut RunInfo;
}

/// Stock [`Command`] for a single statically known job type.
///
/// Deployments with several job kinds typically use an `Envelope` over a
/// serde-tagged enum of kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<J> {
    pub id: u64,
    pub job: J,
    #[serde(default)]
    pub run_info: RunInfo,
}

impl<J> Envelope<J> {
    pub fn new(id: u64, job: J, run_info: RunInfo) -> Self {
        Self { id, job, run_info }
    }
}

impl<J: Job + 'static> Command for Envelope<J> {
    fn id(&self) -> u64 {
        self.id
    }

    fn job_mut(&mut self) -> Result<&mut dyn Job, CoreError> {
        Ok(&mut self.job)
    }

    fn run_info(&self) -> &RunInfo {
        &self.run_info
    }

    fn run_info_mut(&mut self) -> &mut RunInfo {
        &mut self.run_info
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
