//! Shared fixtures for the worker integration tests: a scripted job, a
//! recording notifier, an observed in-memory queue and a pool harness.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cmdpool_core::{
    Codec, CodecError, Command, Envelope, Job, JobContext, JobError, JsonCodec, Notifier,
    NotifyError, Payload, RunInfo, State, Status,
};
use cmdpool_queue::{CommandQueue, InMemoryQueue, QueueError};
use cmdpool_worker::{Manager, WorkerConfig, WorkerError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pid reported by [`ScriptedJob`] in the statuses it returns.
pub const JOB_PID: i64 = 4242;

pub const STARTED_URL: &str = "http://hooks.test/started";
pub const RUNNING_URL: &str = "http://hooks.test/running";
pub const FINISHED_URL: &str = "http://hooks.test/finished";

// ---------------------------------------------------------------------------
// Scripted job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Report(State),
    Fail,
}

/// Job that replays a fixed list of outcomes, one per operation call.
///
/// The cursor is serialized with the job, so it advances across re-queues.
/// Once the list is exhausted the last step repeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedJob {
    pub steps: Vec<Step>,
    pub cursor: usize,
    #[serde(skip)]
    command_id: u64,
}

impl ScriptedJob {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            cursor: 0,
            command_id: 0,
        }
    }

    fn next(&mut self) -> Result<Status, JobError> {
        let step = self
            .steps
            .get(self.cursor)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(Step::Fail);
        self.cursor += 1;

        match step {
            Step::Report(state) => {
                Ok(Status::new(self.command_id, state).with_payload(Payload::now(JOB_PID, 0)))
            }
            Step::Fail => Err(JobError::Request("scripted failure".into())),
        }
    }
}

#[async_trait]
impl Job for ScriptedJob {
    fn bind(&mut self, ctx: JobContext) {
        self.command_id = ctx.command_id.parse().unwrap_or_default();
    }

    async fn create(&mut self) -> Result<Status, JobError> {
        self.next()
    }

    async fn get(&mut self, _start_operation: &str) -> Result<Status, JobError> {
        self.next()
    }

    async fn delete(&mut self) -> Result<Status, JobError> {
        self.next()
    }
}

pub type TestCommand = Envelope<ScriptedJob>;

/// Command with the standard started / finished callbacks.
pub fn command(id: u64, operation: &str, steps: Vec<Step>) -> TestCommand {
    let info = RunInfo::new(operation)
        .with_callback("started", STARTED_URL)
        .with_callback("finished", FINISHED_URL);
    Envelope::new(id, ScriptedJob::new(steps), info)
}

// ---------------------------------------------------------------------------
// Tracking codec
// ---------------------------------------------------------------------------

/// JSON codec that records `(command id, operation)` for every decode,
/// i.e. for every attempt a worker makes, along with the time it was made.
#[derive(Debug, Default, Clone)]
pub struct TrackingCodec {
    inner: Arc<JsonCodec<TestCommand>>,
    attempts: Arc<Mutex<Vec<(u64, String)>>>,
    times: Arc<Mutex<Vec<(u64, Instant)>>>,
}

impl TrackingCodec {
    pub fn attempts(&self) -> Vec<(u64, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, id: u64) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|(cmd_id, _)| *cmd_id == id)
            .map(|(_, op)| op)
            .collect()
    }

    /// Clock readings of each attempt on command `id`. Uses the tokio
    /// clock, so paused-time tests see virtual instants.
    pub fn times_for(&self, id: u64) -> Vec<Instant> {
        self.times
            .lock()
            .unwrap()
            .iter()
            .filter(|(cmd_id, _)| *cmd_id == id)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl Codec for TrackingCodec {
    type Command = TestCommand;

    fn marshal(&self, cmd: &TestCommand) -> Result<Vec<u8>, CodecError> {
        self.inner.marshal(cmd)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<TestCommand, CodecError> {
        let cmd = self.inner.unmarshal(bytes)?;
        self.attempts
            .lock()
            .unwrap()
            .push((cmd.id(), cmd.run_info().operation.clone()));
        self.times.lock().unwrap().push((cmd.id(), Instant::now()));
        Ok(cmd)
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

/// Records every webhook attempt. URLs can be told to fail a number of
/// times first.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    posts: Mutex<Vec<(String, Payload)>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl RecordingNotifier {
    pub fn fail(&self, url: &str, times: usize) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn posts(&self) -> Vec<(String, Payload)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.posts().into_iter().map(|(url, _)| url).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(
        &self,
        url: &str,
        payload: &Payload,
        headers: &[(&str, &str)],
    ) -> Result<u16, NotifyError> {
        assert!(headers.contains(&("Content-Type", "application/json")));
        assert!(headers.contains(&("Accept", "*/*")));

        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NotifyError::HttpStatus(503));
            }
        }
        Ok(200)
    }
}

// ---------------------------------------------------------------------------
// Observed queue
// ---------------------------------------------------------------------------

/// [`InMemoryQueue`] that also records the key of every push.
#[derive(Debug, Default)]
pub struct ObservedQueue {
    pub inner: InMemoryQueue,
    pushed_keys: Mutex<Vec<String>>,
}

impl ObservedQueue {
    pub fn pushed_keys(&self) -> Vec<String> {
        self.pushed_keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandQueue for ObservedQueue {
    async fn push(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.pushed_keys.lock().unwrap().push(key.to_string());
        self.inner.push(key, payload).await
    }

    async fn blocking_pop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        self.inner.blocking_pop(key, timeout).await
    }
}

// ---------------------------------------------------------------------------
// Pool harness
// ---------------------------------------------------------------------------

/// Fast settings: short pops and no backoff.
pub fn test_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_queue_timeout(Duration::from_millis(50))
        .with_backoff(Duration::ZERO, Duration::ZERO)
}

pub struct Pool {
    pub manager: Manager<TrackingCodec>,
    pub queues: Vec<Arc<ObservedQueue>>,
    pub notifier: Arc<RecordingNotifier>,
    pub codec: TrackingCodec,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<Result<(), WorkerError>>>,
}

impl Pool {
    /// Build a pool without starting any loop.
    pub fn build(workers: usize, config: WorkerConfig) -> Self {
        let queues: Vec<Arc<ObservedQueue>> =
            (0..workers).map(|_| Arc::new(ObservedQueue::default())).collect();
        let stores: Vec<Arc<dyn CommandQueue>> = queues
            .iter()
            .map(|q| Arc::clone(q) as Arc<dyn CommandQueue>)
            .collect();
        let notifier = Arc::new(RecordingNotifier::default());
        let codec = TrackingCodec::default();

        let manager = Manager::new(
            stores,
            codec.clone(),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            config,
        )
        .unwrap();

        Self {
            manager,
            queues,
            notifier,
            codec,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Build a pool and spawn every loop.
    pub fn start(workers: usize, config: WorkerConfig) -> Self {
        let mut pool = Self::build(workers, config);
        pool.spawn(|_| true);
        pool
    }

    /// Spawn the runnables whose index passes `filter`.
    pub fn spawn(&mut self, filter: impl Fn(usize) -> bool) {
        for (idx, run) in self.manager.runnables().into_iter().enumerate() {
            if filter(idx) {
                self.handles.push(tokio::spawn(run(self.cancel.child_token())));
            }
        }
    }

    /// Cancel every loop and collect their results in spawn order.
    pub async fn shutdown(self) -> Vec<Result<(), WorkerError>> {
        self.cancel.cancel();
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            let joined = tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("loop did not stop after cancellation")
                .expect("loop panicked");
            results.push(joined);
        }
        results
    }
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let the pool run for a while so that unexpected extra work would show up.
pub fn settle() -> impl Future<Output = ()> {
    tokio::time::sleep(Duration::from_millis(250))
}
