//! Integration tests for [`WebhookDelivery`] against an in-process HTTP
//! endpoint.
//!
//! Each test binds an `axum` server to an ephemeral port, records what it
//! receives, and answers with a scripted status code.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;

use cmdpool_core::{Notifier, NotifyError, Payload, WEBHOOK_HEADERS};
use cmdpool_events::{RetryOptions, WebhookDelivery};

/// A request as seen by the test endpoint.
#[derive(Debug, Clone)]
struct Received {
    content_type: Option<String>,
    accept: Option<String>,
    body: serde_json::Value,
}

/// Shared state of the test endpoint.
#[derive(Clone)]
struct Endpoint {
    received: Arc<Mutex<Vec<Received>>>,
    calls: Arc<AtomicUsize>,
    /// Number of leading calls answered with `failure`.
    failures: usize,
    failure: StatusCode,
}

async fn hook(State(endpoint): State<Endpoint>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let call = endpoint.calls.fetch_add(1, Ordering::SeqCst);

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    endpoint.received.lock().unwrap().push(Received {
        content_type: header("content-type"),
        accept: header("accept"),
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });

    if call < endpoint.failures {
        endpoint.failure
    } else {
        StatusCode::OK
    }
}

/// Start the endpoint and return its `/hook` URL.
async fn spawn_endpoint(failures: usize, failure: StatusCode) -> (String, Endpoint) {
    let endpoint = Endpoint {
        received: Arc::new(Mutex::new(Vec::new())),
        calls: Arc::new(AtomicUsize::new(0)),
        failures,
        failure,
    };

    let app = Router::new()
        .route("/hook", post(hook))
        .with_state(endpoint.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), endpoint)
}

fn delivery() -> WebhookDelivery {
    WebhookDelivery::new(Duration::from_secs(5)).unwrap()
}

// ---------------------------------------------------------------------------
// Test: payload and headers reach the endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn posts_payload_with_webhook_headers() {
    let (url, endpoint) = spawn_endpoint(0, StatusCode::OK).await;

    let status = delivery()
        .post(&url, &Payload::now(-1, 1), &WEBHOOK_HEADERS)
        .await
        .expect("delivery should succeed");

    assert_eq!(status, 200);

    let received = endpoint.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(received[0].accept.as_deref(), Some("*/*"));
    assert_eq!(received[0].body["Message"]["Pid"], -1);
    assert_eq!(received[0].body["Message"]["WrapperExitCode"], 1);
    assert!(received[0].body["Time"].is_string());
}

// ---------------------------------------------------------------------------
// Test: non-2xx is an error and is not retried by default
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (url, endpoint) = spawn_endpoint(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR).await;

    let result = delivery()
        .post(&url, &Payload::now(-1, 0), &WEBHOOK_HEADERS)
        .await;

    assert_matches!(result, Err(NotifyError::HttpStatus(500)));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: server errors are retried when a retry policy is set
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retries_server_errors_until_success() {
    let (url, endpoint) = spawn_endpoint(2, StatusCode::SERVICE_UNAVAILABLE).await;

    let delivery = delivery().with_retry(RetryOptions {
        max: 3,
        wait_min: Duration::from_millis(10),
        wait_max: Duration::from_millis(20),
    });

    let status = delivery
        .post(&url, &Payload::now(-1, 0), &WEBHOOK_HEADERS)
        .await
        .expect("third attempt should succeed");

    assert_eq!(status, 200);
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Test: client errors are never retried
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (url, endpoint) = spawn_endpoint(usize::MAX, StatusCode::NOT_FOUND).await;

    let delivery = delivery().with_retry(RetryOptions {
        max: 3,
        wait_min: Duration::from_millis(10),
        wait_max: Duration::from_millis(20),
    });

    let result = delivery
        .post(&url, &Payload::now(-1, 0), &WEBHOOK_HEADERS)
        .await;

    assert_matches!(result, Err(NotifyError::HttpStatus(404)));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: unreachable endpoint is a transport error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = delivery()
        .post(&format!("http://{addr}/hook"), &Payload::now(-1, 0), &WEBHOOK_HEADERS)
        .await;

    assert_matches!(result, Err(NotifyError::Transport(_)));
}
