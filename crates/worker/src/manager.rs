//! Fixed pool of workers with id-based shard routing.

use std::sync::Arc;

use async_trait::async_trait;
use cmdpool_core::{Codec, Command, Notifier};
use cmdpool_queue::{CommandQueue, RedisQueue};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{ConfigError, WorkerConfig};
use crate::error::WorkerError;
use crate::worker::Worker;

/// One supervised loop. Resolves to [`WorkerError::Interrupted`] on a clean
/// shutdown.
pub type RunFn =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), WorkerError>> + Send>;

/// Submission capability, for callers that only need to hand off commands.
#[async_trait]
pub trait Dispatch<T: Command>: Send + Sync {
    async fn push(&self, cmd: T) -> Result<(), WorkerError>;
}

/// Shard index for a command id. `workers` must be non-zero.
pub(crate) fn shard_for(id: u64, workers: usize) -> usize {
    (id % workers as u64) as usize
}

/// Owns the workers and routes commands to them by id.
#[derive(Debug)]
pub struct Manager<C: Codec> {
    workers: Vec<Arc<Worker<C>>>,
}

impl<C: Codec> Manager<C> {
    /// Build one worker per store. Worker `i` owns shard `i`.
    pub fn new(
        stores: Vec<Arc<dyn CommandQueue>>,
        codec: C,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Result<Self, ConfigError> {
        if stores.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        config.validate()?;

        let codec = Arc::new(codec);
        let workers = stores
            .into_iter()
            .enumerate()
            .map(|(id, store)| {
                Arc::new(Worker::new(
                    id,
                    store,
                    Arc::clone(&notifier),
                    Arc::clone(&codec),
                    config.clone(),
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(
            workers = workers.len(),
            queue = %config.queue_name,
            "Worker pool created"
        );

        Ok(Self { workers })
    }

    /// Connect one [`RedisQueue`] per address and build the pool.
    pub async fn connect(
        addresses: &[String],
        codec: C,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Result<Self, WorkerError> {
        if addresses.is_empty() {
            return Err(ConfigError::NoWorkers.into());
        }

        let mut stores: Vec<Arc<dyn CommandQueue>> = Vec::with_capacity(addresses.len());
        for address in addresses {
            stores.push(Arc::new(RedisQueue::connect(address).await?));
        }

        Ok(Self::new(stores, codec, notifier, config)?)
    }

    /// Route `cmd` to worker `id % len` and wait for room in its intake
    /// buffer.
    pub async fn push(&self, cmd: C::Command) -> Result<(), WorkerError> {
        let idx = shard_for(cmd.id(), self.workers.len());
        tracing::debug!(cmd_id = cmd.id(), worker_id = idx, "Routing command");
        self.workers[idx].push(cmd).await
    }

    /// Both loops of every worker, in order: worker 0 enqueue, worker 0
    /// consume, worker 1 enqueue, ...
    pub fn runnables(&self) -> Vec<RunFn> {
        let mut runnables: Vec<RunFn> = Vec::with_capacity(self.workers.len() * 2);

        for worker in &self.workers {
            let enqueue = Arc::clone(worker);
            runnables.push(Box::new(move |cancel| {
                let span = enqueue.span().clone();
                async move { enqueue.enqueue_loop(cancel).await }
                    .instrument(span)
                    .boxed()
            }));

            let consume = Arc::clone(worker);
            runnables.push(Box::new(move |cancel| {
                let span = consume.span().clone();
                async move { consume.consume_loop(cancel).await }
                    .instrument(span)
                    .boxed()
            }));
        }

        runnables
    }

    pub fn worker(&self, idx: usize) -> Option<&Worker<C>> {
        self.workers.get(idx).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[async_trait]
impl<C: Codec> Dispatch<C::Command> for Manager<C> {
    async fn push(&self, cmd: C::Command) -> Result<(), WorkerError> {
        Manager::push(self, cmd).await
    }
}
