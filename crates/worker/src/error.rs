use cmdpool_core::{CodecError, CoreError, JobError};
use cmdpool_queue::QueueError;

use crate::config::ConfigError;

/// Which of a worker's two loops an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Enqueue,
    Consume,
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopKind::Enqueue => f.write_str("enqueue"),
            LoopKind::Consume => f.write_str("consume"),
        }
    }
}

/// Errors produced by workers and the manager.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Sentinel returned by a loop once its cancellation token fires.
    #[error("worker {worker} {task} loop interrupted")]
    Interrupted { worker: usize, task: LoopKind },

    /// The blocking pop timed out with nothing to process.
    #[error("command queue is empty")]
    EmptyQueue,

    /// The worker's intake buffer no longer accepts commands.
    #[error("worker {worker} intake buffer is closed")]
    IntakeClosed { worker: usize },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WorkerError {
    /// `true` for the clean-shutdown sentinel.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WorkerError::Interrupted { .. })
    }
}
