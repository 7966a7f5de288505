//! A single worker: one shard of the backing queue, a bounded intake buffer
//! in front of it, and the two loops that connect them.
//!
//! ```text
//! push() -> intake buffer -> enqueue_loop -> shard list -> consume_loop -> run()
//!              ^                                                           |
//!              +------------- requeue (poll again / retry) ----------------+
//! ```
//!
//! Commands for one worker are executed strictly one at a time by the
//! consume loop. Callers learn about progress only through the lifecycle
//! webhooks fired from [`Worker::process_status`] and
//! [`Worker::process_error`].

use std::sync::Arc;

use cmdpool_core::command::{
    CALLBACK_FINISHED, CALLBACK_RUNNING, CALLBACK_STARTED, OPERATION_STATUS,
};
use cmdpool_core::state::UNKNOWN_PID;
use cmdpool_core::{
    exp_backoff, Codec, Command, JobContext, Notifier, Operation, Payload, State, Status,
    WEBHOOK_HEADERS,
};
use cmdpool_queue::CommandQueue;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{self, WorkerConfig};
use crate::error::{LoopKind, WorkerError};

/// Backoff exponent used for every re-queue.
const REQUEUE_BACKOFF_RETRY: u32 = 1;

/// Owner of one shard.
///
/// Created by the [`Manager`](crate::Manager) and shared between its two
/// loops through an `Arc`.
pub struct Worker<C: Codec> {
    id: usize,
    shard_key: String,
    backup_key: String,
    dead_letter_key: String,
    config: WorkerConfig,
    store: Arc<dyn CommandQueue>,
    notifier: Arc<dyn Notifier>,
    codec: Arc<C>,
    intake_tx: mpsc::Sender<C::Command>,
    intake_rx: Mutex<mpsc::Receiver<C::Command>>,
    span: tracing::Span,
}

impl<C: Codec> std::fmt::Debug for Worker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("shard_key", &self.shard_key)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> Worker<C> {
    pub fn new(
        id: usize,
        store: Arc<dyn CommandQueue>,
        notifier: Arc<dyn Notifier>,
        codec: Arc<C>,
        config: WorkerConfig,
    ) -> Self {
        let shard_key = config::shard_key(&config.queue_name, id);
        let backup_key = config::backup_key(&shard_key);
        let dead_letter_key = config::dead_letter_key(&shard_key);
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);

        let span = tracing::info_span!(
            "worker",
            worker_id = id,
            shard = %shard_key,
            labels = %config.labels_display()
        );

        Self {
            id,
            shard_key,
            backup_key,
            dead_letter_key,
            config,
            store,
            notifier,
            codec,
            intake_tx,
            intake_rx: Mutex::new(intake_rx),
            span,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn shard_key(&self) -> &str {
        &self.shard_key
    }

    /// Reserved for crash recovery; nothing reads or writes it yet.
    pub fn backup_key(&self) -> &str {
        &self.backup_key
    }

    pub fn dead_letter_key(&self) -> &str {
        &self.dead_letter_key
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Hand a command to this worker's intake buffer.
    ///
    /// Waits while the buffer is full.
    pub async fn push(&self, cmd: C::Command) -> Result<(), WorkerError> {
        self.intake_tx
            .send(cmd)
            .await
            .map_err(|_| WorkerError::IntakeClosed { worker: self.id })
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Move commands from the intake buffer onto the shard list.
    ///
    /// Returns [`WorkerError::Interrupted`] once `cancel` fires.
    pub async fn enqueue_loop(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let mut intake = self.intake_rx.lock().await;
        tracing::info!("Enqueue loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(status = "exit", "Enqueue loop stopping");
                    return Err(self.interrupted(LoopKind::Enqueue));
                }
                received = intake.recv() => {
                    // The worker holds its own sender, so the channel never closes.
                    let Some(cmd) = received else {
                        return Err(WorkerError::IntakeClosed { worker: self.id });
                    };
                    let cmd_id = cmd.id();
                    if let Err(e) = self.store_command(cmd).await {
                        tracing::error!(
                            cmd_id,
                            context = store_context(&e),
                            error = %e,
                            "Dropping command that could not be enqueued"
                        );
                    }
                }
            }
        }
    }

    /// Pop, decode and execute commands from the shard list.
    ///
    /// Cancellation is checked between pops, so shutdown waits at most one
    /// queue timeout. Returns [`WorkerError::Interrupted`] once `cancel`
    /// fires.
    pub async fn consume_loop(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        tracing::info!(
            timeout_secs = self.config.queue_timeout.as_secs_f64(),
            "Consume loop started"
        );

        loop {
            if cancel.is_cancelled() {
                tracing::info!(status = "exit", "Consume loop stopping");
                return Err(self.interrupted(LoopKind::Consume));
            }

            let cmd = match self.pop().await {
                Ok(cmd) => cmd,
                Err(WorkerError::EmptyQueue) => continue,
                Err(e) => {
                    tracing::error!(context = pop_context(&e), error = %e, "Failed to pop command");
                    continue;
                }
            };

            self.run(cmd, &cancel).await;
        }
    }

    // -----------------------------------------------------------------------
    // Dequeue / dispatch
    // -----------------------------------------------------------------------

    /// Blocking-pop the shard head and decode it.
    ///
    /// [`WorkerError::EmptyQueue`] signals a timeout with nothing popped.
    pub async fn pop(&self) -> Result<C::Command, WorkerError> {
        let bytes = self
            .store
            .blocking_pop(&self.shard_key, self.config.queue_timeout)
            .await?
            .ok_or(WorkerError::EmptyQueue)?;

        match self.codec.unmarshal(&bytes) {
            Ok(cmd) => Ok(cmd),
            Err(e) => {
                if self.config.dead_letter {
                    self.dead_letter(bytes).await;
                }
                Err(e.into())
            }
        }
    }

    async fn dead_letter(&self, bytes: Vec<u8>) {
        let size = bytes.len();
        match self.store.push(&self.dead_letter_key, bytes).await {
            Ok(()) => tracing::warn!(
                context = "dead_letter",
                key = %self.dead_letter_key,
                size,
                "Moved undecodable payload to dead-letter list"
            ),
            Err(e) => tracing::error!(
                context = "dead_letter",
                key = %self.dead_letter_key,
                error = %e,
                "Failed to dead-letter undecodable payload"
            ),
        }
    }

    /// Execute one attempt of `cmd` and route the outcome.
    ///
    /// Unknown operations and unresolvable job types are logged and the
    /// command is dropped; job failures go through [`Self::process_error`].
    pub async fn run(&self, mut cmd: C::Command, cancel: &CancellationToken) {
        let cmd_id = cmd.id();

        match self.dispatch(&mut cmd).await {
            Ok(status) => {
                tracing::info!(
                    cmd_id,
                    context = "run",
                    state = %status.state,
                    operation = %cmd.run_info().operation,
                    "Command operation completed"
                );
                self.process_status(cmd, status, cancel).await;
            }
            Err(WorkerError::Job(e)) => {
                tracing::warn!(
                    cmd_id,
                    context = "run",
                    retry_count = cmd.run_info().retry_count,
                    max_retries = cmd.run_info().max_retries,
                    error = %e,
                    "Command operation failed"
                );
                self.process_error(cmd, cancel).await;
            }
            Err(e) => {
                tracing::error!(cmd_id, context = "run", error = %e, "Dropping command");
            }
        }
    }

    async fn dispatch(&self, cmd: &mut C::Command) -> Result<Status, WorkerError> {
        let cmd_id = cmd.id();
        let operation = Operation::parse(&cmd.run_info().operation)?;

        let run_info = cmd.run_info_mut();
        run_info.operation = run_info.operation.to_lowercase();
        if run_info.start_operation.is_none() {
            run_info.start_operation = Some(run_info.operation.clone());
        }
        let start_operation = run_info.start_operation().to_string();

        let job = cmd.job_mut()?;
        job.bind(JobContext::new(cmd_id.to_string(), self.span.clone()));

        let status = match operation {
            Operation::Create => job.create().await?,
            Operation::Get => job.get(&start_operation).await?,
            Operation::Delete => job.delete().await?,
        };
        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Outcome handling
    // -----------------------------------------------------------------------

    /// Fire the webhook for a state change and decide whether to poll again.
    pub async fn process_status(
        &self,
        mut cmd: C::Command,
        mut status: Status,
        cancel: &CancellationToken,
    ) {
        let cmd_id = cmd.id();
        let previous = cmd.run_info().current_state;
        let mut delivered = true;

        tracing::debug!(
            cmd_id,
            context = "process_status",
            state = %status.state,
            start_operation = %cmd.run_info().start_operation(),
            "Processing status"
        );

        match status.state {
            State::Running if previous != Some(State::Running) => {
                let info = cmd.run_info_mut();
                info.running_hook = info.callback(CALLBACK_RUNNING);
                let hook = info.running_hook.clone();
                delivered = self.notify(cmd_id, &hook, &status.payload).await;
                if delivered {
                    cmd.run_info_mut().current_state = Some(State::Running);
                }
            }
            State::Pending if previous != Some(State::Pending) => {
                let info = cmd.run_info_mut();
                info.pending_hook = info.callback(CALLBACK_STARTED);
                let hook = info.pending_hook.clone();
                status.payload = Payload::now(UNKNOWN_PID, 0);
                delivered = self.notify(cmd_id, &hook, &status.payload).await;
                if delivered {
                    cmd.run_info_mut().current_state = Some(State::Pending);
                }
            }
            State::Errored | State::Terminated => {
                let hook = self.prepare_finish(&mut cmd, &mut status);
                cmd.run_info_mut().current_state = Some(status.state);
                if self.notify(cmd_id, &hook, &status.payload).await {
                    return;
                }
            }
            State::Running | State::Pending => {}
        }

        if cmd.run_info().is_finished(status.state) {
            // Second and final attempt at the finish webhook.
            let hook = self.prepare_finish(&mut cmd, &mut status);
            if !self.notify(cmd_id, &hook, &status.payload).await {
                tracing::error!(
                    cmd_id,
                    context = "process_status",
                    state = %status.state,
                    "Finish webhook undelivered; command is done"
                );
            }
            return;
        }

        if !delivered {
            tracing::warn!(
                cmd_id,
                context = "process_status",
                state = %status.state,
                "State change not recorded; will report again on next poll"
            );
        }

        cmd.run_info_mut().operation = OPERATION_STATUS.to_string();
        self.requeue(cmd, cancel).await;
    }

    /// Retry a failed attempt, or give up and report the command as errored.
    pub async fn process_error(&self, mut cmd: C::Command, cancel: &CancellationToken) {
        let cmd_id = cmd.id();
        let info = cmd.run_info_mut();

        if info.retry_count < info.max_retries {
            info.retry_count += 1;
            tracing::info!(
                cmd_id,
                context = "process_error",
                retry_count = info.retry_count,
                max_retries = info.max_retries,
                "Retrying command"
            );
            self.requeue(cmd, cancel).await;
            return;
        }

        info.finish_hook = info.callback(CALLBACK_FINISHED);
        info.exit_code = 1;
        let hook = info.finish_hook.clone();
        let status = Status::new(cmd_id, State::Errored)
            .with_payload(Payload::now(UNKNOWN_PID, info.exit_code));

        tracing::warn!(
            cmd_id,
            context = "process_error",
            retries = info.max_retries,
            "Retries exhausted; reporting command as errored"
        );
        if !self.notify(cmd_id, &hook, &status.payload).await {
            tracing::error!(cmd_id, context = "process_error", "Finish webhook undelivered");
        }
    }

    /// Populate the finish hook and exit code and rebuild the payload.
    fn prepare_finish(&self, cmd: &mut C::Command, status: &mut Status) -> String {
        let info = cmd.run_info_mut();
        if status.state == State::Errored {
            info.exit_code = 1;
        }
        info.finish_hook = info.callback(CALLBACK_FINISHED);
        status.payload = Payload::now(UNKNOWN_PID, info.exit_code);
        info.finish_hook.clone()
    }

    /// POST `payload` to `hook`. Returns `true` when the state change counts
    /// as recorded; a blank hook is treated as delivered.
    async fn notify(&self, cmd_id: u64, hook: &str, payload: &Payload) -> bool {
        if hook.is_empty() {
            tracing::debug!(cmd_id, context = "notify", "Blank hook; nothing to deliver");
            return true;
        }

        match self.notifier.post(hook, payload, &WEBHOOK_HEADERS).await {
            Ok(http_status) => {
                tracing::info!(cmd_id, context = "notify", hook, http_status, "Webhook delivered");
                true
            }
            Err(e) => {
                tracing::warn!(
                    cmd_id,
                    context = "notify",
                    hook,
                    error = %e,
                    "Webhook delivery failed"
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Requeue
    // -----------------------------------------------------------------------

    /// Wait one backoff interval, then put `cmd` back on this worker.
    ///
    /// If the worker is shutting down the backoff is skipped and the command
    /// is written straight to the shard list, since the enqueue loop may
    /// already be gone.
    async fn requeue(&self, cmd: C::Command, cancel: &CancellationToken) {
        let cmd_id = cmd.id();
        let delay = exp_backoff(
            REQUEUE_BACKOFF_RETRY,
            self.config.backoff_min,
            self.config.backoff_max,
        );
        tracing::debug!(
            cmd_id,
            context = "requeue",
            delay_ms = delay.as_millis() as u64,
            "Requeueing command"
        );

        let reserved = tokio::select! {
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = self.intake_tx.reserve() => Some(permit),
                }
            }
        };

        match reserved {
            Some(Ok(permit)) => permit.send(cmd),
            Some(Err(_)) => {
                tracing::error!(
                    cmd_id,
                    context = "requeue",
                    "Intake buffer closed; dropping command"
                );
            }
            None => {
                if let Err(e) = self.store_command(cmd).await {
                    tracing::error!(
                        cmd_id,
                        context = store_context(&e),
                        error = %e,
                        "Failed to persist command during shutdown"
                    );
                }
            }
        }
    }

    /// Encode `cmd` and append it to the shard list.
    async fn store_command(&self, cmd: C::Command) -> Result<(), WorkerError> {
        let cmd_id = cmd.id();
        let bytes = self.codec.marshal(&cmd)?;
        self.store.push(&self.shard_key, bytes).await?;
        tracing::debug!(cmd_id, context = "push", "Command enqueued");
        Ok(())
    }

    fn interrupted(&self, task: LoopKind) -> WorkerError {
        WorkerError::Interrupted {
            worker: self.id,
            task,
        }
    }
}

fn store_context(e: &WorkerError) -> &'static str {
    match e {
        WorkerError::Codec(_) => "marshal",
        _ => "push",
    }
}

fn pop_context(e: &WorkerError) -> &'static str {
    match e {
        WorkerError::Codec(_) => "unmarshal",
        _ => "pop",
    }
}
