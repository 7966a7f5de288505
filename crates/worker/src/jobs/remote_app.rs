//! Job kind that drives an application on a remote execution service over
//! REST.
//!
//! | Operation | Request                     |
//! |-----------|-----------------------------|
//! | create    | `POST {base_url}/apps`      |
//! | get       | `GET {base_url}/apps/{id}`  |
//! | delete    | `DELETE {base_url}/apps/{id}` |
//!
//! Every endpoint answers with an [`AppResponse`]. The remote id returned by
//! `create` is stored on the job, so it survives the trip back through the
//! queue and later polls can address the application.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use cmdpool_core::state::UNKNOWN_PID;
use cmdpool_core::{Job, JobContext, JobError, Payload, State, Status};
use serde::{Deserialize, Serialize};

/// Per-request timeout for calls to the remote service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the command id, so the remote side can deduplicate
/// resubmissions.
pub const COMMAND_ID_HEADER: &str = "X-Command-Id";

/// Body returned by every remote endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AppResponse {
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// An application submitted to and polled on a remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteApp {
    /// Service root, e.g. `http://runner:8080/api`.
    pub base_url: String,
    /// Submission body forwarded verbatim on create.
    #[serde(default)]
    pub submission: serde_json::Value,
    /// Remote id, known once `create` succeeded.
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(skip)]
    ctx: Option<JobContext>,
    #[serde(skip, default = "shared_client")]
    client: reqwest::Client,
}

impl RemoteApp {
    pub fn new(base_url: impl Into<String>, submission: serde_json::Value) -> Self {
        Self {
            base_url: base_url.into(),
            submission,
            app_id: None,
            ctx: None,
            client: shared_client(),
        }
    }

    /// Job for an application that was already submitted elsewhere.
    pub fn existing(base_url: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            ..Self::new(base_url, serde_json::Value::Null)
        }
    }

    fn apps_url(&self) -> String {
        format!("{}/apps", self.base_url.trim_end_matches('/'))
    }

    fn app_url(&self) -> Result<String, JobError> {
        let id = self
            .app_id
            .as_deref()
            .ok_or_else(|| JobError::NotReady("remote app has not been created".into()))?;
        Ok(format!("{}/{id}", self.apps_url()))
    }

    fn command_id(&self) -> &str {
        self.ctx.as_ref().map_or("", |ctx| ctx.command_id.as_str())
    }

    fn span(&self) -> tracing::Span {
        self.ctx
            .as_ref()
            .map_or_else(tracing::Span::current, |ctx| ctx.span.clone())
    }

    fn status_from(&self, response: &AppResponse) -> Result<Status, JobError> {
        let state = map_state(&response.state)?;
        let command_id = self.command_id().parse().unwrap_or_default();
        let payload = Payload::now(
            response.pid.unwrap_or(UNKNOWN_PID),
            response.exit_code.unwrap_or_default(),
        );
        Ok(Status::new(command_id, state).with_payload(payload))
    }

    // ---- private helpers ----

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<AppResponse, JobError> {
        let response = request
            .header(COMMAND_ID_HEADER, self.command_id())
            .send()
            .await
            .map_err(|e| JobError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<AppResponse>()
            .await
            .map_err(|e| JobError::Request(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl Job for RemoteApp {
    fn bind(&mut self, ctx: JobContext) {
        self.ctx = Some(ctx);
    }

    async fn create(&mut self) -> Result<Status, JobError> {
        if let Some(id) = &self.app_id {
            // Already submitted on an earlier attempt; report where it is.
            tracing::debug!(
                parent: &self.span(),
                app_id = %id,
                "Remote app exists; polling instead"
            );
            return self.get("create").await;
        }

        let request = self.client.post(self.apps_url()).json(&self.submission);
        let response = self.send(request).await?;

        tracing::info!(
            parent: &self.span(),
            cmd_id = %self.command_id(),
            app_id = %response.id,
            state = %response.state,
            "Remote app created"
        );

        self.app_id = Some(response.id.clone());
        self.status_from(&response)
    }

    async fn get(&mut self, start_operation: &str) -> Result<Status, JobError> {
        let request = self.client.get(self.app_url()?);

        match self.send(request).await {
            Ok(response) => self.status_from(&response),
            // After a cancel the service may forget the app entirely.
            Err(JobError::Rejected { status: 404, .. }) if is_cancel(start_operation) => {
                tracing::info!(
                    parent: &self.span(),
                    cmd_id = %self.command_id(),
                    "Cancelled remote app is gone"
                );
                let command_id = self.command_id().parse().unwrap_or_default();
                Ok(Status::new(command_id, State::Terminated))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&mut self) -> Result<Status, JobError> {
        let request = self.client.delete(self.app_url()?);
        let response = self.send(request).await?;

        tracing::info!(
            parent: &self.span(),
            cmd_id = %self.command_id(),
            app_id = %response.id,
            state = %response.state,
            "Remote app cancel requested"
        );

        self.status_from(&response)
    }
}

fn is_cancel(operation: &str) -> bool {
    matches!(operation, "cancel" | "delete")
}

/// Map a remote state string onto a lifecycle [`State`].
pub fn map_state(raw: &str) -> Result<State, JobError> {
    match raw.to_lowercase().as_str() {
        "pending" | "queued" | "submitted" | "accepted" => Ok(State::Pending),
        "running" | "started" | "cancelling" => Ok(State::Running),
        "failed" | "error" | "errored" | "killed" => Ok(State::Errored),
        "finished" | "succeeded" | "completed" | "terminated" | "cancelled" => {
            Ok(State::Terminated)
        }
        _ => Err(JobError::UnknownState(raw.to_string())),
    }
}

fn shared_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default()
        })
        .clone()
}
