//! `cmdpool-worker` -- command worker daemon.
//!
//! Connects one worker per Redis address, runs both loops of every worker
//! until SIGINT / SIGTERM, then cancels them and waits for a clean exit.
//!
//! # Environment variables
//!
//! | Variable                 | Default          | Description                          |
//! |--------------------------|------------------|--------------------------------------|
//! | `REDIS_ADDRS`            | `127.0.0.1:6379` | Comma separated; one worker each     |
//! | `CMD_QUEUE`              | `cmdqueue`       | Base name of the shard lists         |
//! | `CMD_QUEUE_TIMEOUT_SECS` | `5`              | Blocking pop timeout                 |
//! | `CMD_INTAKE_CAPACITY`    | `100`            | Intake buffer size per worker        |
//! | `CMD_BACKOFF_MIN_MS`     | `2000`           | Re-queue backoff lower bound         |
//! | `CMD_BACKOFF_MAX_MS`     | `7000`           | Re-queue backoff upper bound         |
//! | `CMD_DEAD_LETTER`        | `false`          | Keep undecodable payloads            |
//! | `WORKER_LABELS`          | --               | `k=v,k=v` added to every log line    |
//! | `WEBHOOK_TIMEOUT_SECS`   | `10`             | Lifecycle webhook request timeout    |
//! | `SHUTDOWN_TIMEOUT_SECS`  | `10`             | Grace period for the loops to stop   |
//! | `LOG_LEVEL`              | `info`           | Used when `RUST_LOG` is unset        |
//! | `LOG_FORMAT`             | `text`           | `json` for structured output         |

use std::sync::Arc;

use anyhow::Context;
use cmdpool_events::WebhookDelivery;
use cmdpool_worker::{AppCodec, DaemonConfig, Manager, WorkerConfig};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let daemon = DaemonConfig::from_env().context("invalid daemon configuration")?;

    tracing::info!(
        workers = daemon.redis_addrs.len(),
        queue = %config.queue_name,
        timeout_secs = config.queue_timeout.as_secs(),
        dead_letter = config.dead_letter,
        "Starting cmdpool worker"
    );

    let notifier = Arc::new(
        WebhookDelivery::new(daemon.webhook_timeout).context("failed to build webhook client")?,
    );
    let manager = Manager::connect(&daemon.redis_addrs, AppCodec::new(), notifier, config)
        .await
        .context("failed to start worker pool")?;

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for run in manager.runnables() {
        tasks.spawn(run(cancel.child_token()));
    }

    shutdown_signal().await;
    cancel.cancel();

    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Err(e)) if e.is_interrupted() => tracing::debug!(reason = %e, "Loop stopped"),
                Ok(Err(e)) => tracing::error!(error = %e, "Loop exited with error"),
                Ok(Ok(())) => tracing::warn!("Loop exited without interruption"),
                Err(e) => tracing::error!(error = %e, "Loop task panicked"),
            }
        }
    };

    if tokio::time::timeout(daemon.shutdown_timeout, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = daemon.shutdown_timeout.as_secs(),
            "Loops did not stop in time; aborting"
        );
        tasks.abort_all();
    }

    tracing::info!("Worker shut down");
    Ok(())
}

fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            ["cmdpool_worker", "cmdpool_queue", "cmdpool_events", "cmdpool_core"]
                .map(|target| format!("{target}={level}"))
                .join(",")
                .into()
        });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
