//! Sharded command worker pool.
//!
//! A [`Manager`] owns one [`Worker`] per backing queue. Commands are routed
//! by `id % workers`, serialized onto the worker's shard list by its enqueue
//! loop, and executed one at a time by its consume loop, which reports
//! lifecycle changes through webhooks and re-queues commands that need
//! another poll or retry.
//!
//! The loops are handed out by [`Manager::runnables`] for the caller to
//! spawn and supervise.

pub mod config;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod worker;

pub use config::{ConfigError, DaemonConfig, WorkerConfig};
pub use error::{LoopKind, WorkerError};
pub use jobs::{AppCodec, AppCommand, JobKind};
pub use manager::{Dispatch, Manager, RunFn};
pub use worker::Worker;
