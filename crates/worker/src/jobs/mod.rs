//! Job kinds this deployment knows how to run.
//!
//! [`JobKind`] is serialized with a `type` tag, so adding a kind means adding
//! a variant here; the worker and codec stay untouched.

pub mod remote_app;

use async_trait::async_trait;
use cmdpool_core::{Envelope, Job, JobContext, JobError, JsonCodec, Status};
use serde::{Deserialize, Serialize};

pub use remote_app::RemoteApp;

/// The command type carried by this deployment's queues.
pub type AppCommand = Envelope<JobKind>;

/// Codec for [`AppCommand`].
pub type AppCodec = JsonCodec<AppCommand>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    RemoteApp(RemoteApp),
}

#[async_trait]
impl Job for JobKind {
    fn bind(&mut self, ctx: JobContext) {
        match self {
            JobKind::RemoteApp(job) => job.bind(ctx),
        }
    }

    async fn create(&mut self) -> Result<Status, JobError> {
        match self {
            JobKind::RemoteApp(job) => job.create().await,
        }
    }

    async fn get(&mut self, start_operation: &str) -> Result<Status, JobError> {
        match self {
            JobKind::RemoteApp(job) => job.get(start_operation).await,
        }
    }

    async fn delete(&mut self) -> Result<Status, JobError> {
        match self {
            JobKind::RemoteApp(job) => job.delete().await,
        }
    }
}
