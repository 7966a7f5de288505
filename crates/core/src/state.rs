//! Lifecycle states and the status report produced by every job operation.
//!
//! The [`Payload`] shape is the webhook wire format, so its JSON field
//! names are fixed: `{"Time": ..., "Message": {"Pid": ..., "WrapperExitCode": ...}}`.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Process id reported in every payload the worker synthesises itself.
pub const UNKNOWN_PID: i64 = -1;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a command as reported by its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Pending,
    Running,
    Errored,
    Terminated,
}

impl State {
    /// `true` for the states after which a command is never polled again.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Errored | State::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Running => "running",
            State::Errored => "errored",
            State::Terminated => "terminated",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Process details carried inside a webhook payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    pub pid: i64,
    pub wrapper_exit_code: i32,
}

/// Body POSTed to a lifecycle webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payload {
    /// Wall-clock time the payload was built, as text.
    pub time: String,
    pub message: Message,
}

impl Payload {
    /// Build a payload stamped with the current time.
    pub fn now(pid: i64, wrapper_exit_code: i32) -> Self {
        Self {
            time: Utc::now().to_string(),
            message: Message {
                pid,
                wrapper_exit_code,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Result of a single lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub command_id: u64,
    pub state: State,
    #[serde(default)]
    pub payload: Payload,
}

impl Status {
    /// A status with a freshly stamped payload for an unknown process.
    pub fn new(command_id: u64, state: State) -> Self {
        Self {
            command_id,
            state,
            payload: Payload::now(UNKNOWN_PID, 0),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
