//! Command model shared by the cmdpool crates.
//!
//! - [`Command`] / [`Job`] / [`RunInfo`]: what a worker executes and the
//!   metadata it tracks between attempts.
//! - [`Status`] / [`State`] / [`Payload`]: lifecycle results and the webhook
//!   body.
//! - [`Codec`]: command <-> bytes contract for the backing queue.
//! - [`Notifier`]: outbound webhook contract.
//! - [`exp_backoff`]: jittered retry delay.

pub mod backoff;
pub mod codec;
pub mod command;
pub mod error;
pub mod notify;
pub mod state;

pub use backoff::exp_backoff;
pub use codec::{Codec, JsonCodec};
pub use command::{Command, Envelope, Job, JobContext, Operation, RunInfo};
pub use error::{CodecError, CoreError, JobError, NotifyError};
pub use notify::{Notifier, WEBHOOK_HEADERS};
pub use state::{Message, Payload, State, Status};
