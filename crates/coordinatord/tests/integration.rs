//! End-to-end HTTP surface tests: a real router over an in-memory store,
//! driven with signed requests instead of a live socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use coordinator_db::{IdentityStore, JobStore, MessageStore, WorkerStore};
use coordinator_protocol::{Identity, Role};
use coordinator_security::{generate_key, CipherRegistry, RequestSigner};
use coordinator_transport::long_poll::LongPollTransport;
use coordinator_transport::TransportRegistry;
use coordinatord::{routes, AppState, CoordinatorConfig};

async fn test_state() -> AppState {
    let pool = coordinator_test_utils::memory_pool().await;
    let long_poll = Arc::new(LongPollTransport::new("/poll"));
    let mut registry = TransportRegistry::new();
    registry.register(coordinator_protocol::TransportKind::LongPollHttp, long_poll.clone());

    let mut config = CoordinatorConfig::default();
    config.transports.enabled = vec!["long_poll_http".to_string()];

    AppState {
        job_store: JobStore::new(pool.clone()),
        worker_store: WorkerStore::new(pool.clone()),
        message_store: MessageStore::new(pool.clone()),
        identity_store: IdentityStore::new(pool),
        cipher_registry: Arc::new(CipherRegistry::new()),
        transport_registry: Arc::new(registry),
        long_poll,
        config: Arc::new(config),
        trusted_proxies: Arc::new(Vec::new()),
    }
}

/// Creates a plaintext-keyed identity and returns its signer, so tests
/// don't need to go through `bootstrap_localadmin`/cipher wrapping.
async fn seed_identity(state: &AppState, client_id: &str, role: Role) -> RequestSigner {
    let key = generate_key();
    let identity = Identity {
        client_id: client_id.to_string(),
        role,
        hmac_key: key,
        key_wrap_id: None,
        allowed_cidrs: Identity::default_cidrs(),
    };
    state
        .identity_store
        .create_identity(&identity, &hex::encode(key))
        .await
        .unwrap();
    RequestSigner::new(key)
}

fn signed_request(
    signer: &RequestSigner,
    client_id: &str,
    method: &str,
    path: &str,
    body: Vec<u8>,
) -> Request<Body> {
    let now = Utc::now().timestamp();
    let (timestamp, signature) = signer.sign(method, path, &body, now);
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .header("x-dffmpeg-client-id", client_id)
        .header("x-dffmpeg-timestamp", timestamp)
        .header("x-dffmpeg-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Polls `check` until it returns `Some`, or gives up after a second —
/// long enough for the background assignment task spawned by `submit` to
/// run on a busy CI host without making the test itself slow.
async fn wait_for<F, Fut, T>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() {
    let state = test_state().await;
    let app = routes::router(state);

    let req = Request::builder()
        .method("GET")
        .uri("/jobs")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn worker_registers_then_client_submits_and_worker_accepts() {
    let state = test_state().await;
    let worker_signer = seed_identity(&state, "worker-1", Role::Worker).await;
    let client_signer = seed_identity(&state, "alice", Role::Client).await;
    let job_store = state.job_store.clone();
    let app = routes::router(state);

    let register_body = serde_json::to_vec(&serde_json::json!({
        "worker_id": "worker-1",
        "capabilities": ["transcode"],
        "binaries": ["ffmpeg"],
        "paths": ["Movies"],
        "supported_transports": ["long_poll_http"],
        "registration_interval": 30,
        "version": "1.0.0",
    }))
    .unwrap();
    let req = signed_request(&worker_signer, "worker-1", "POST", "/worker/register", register_body);
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let submit_body = serde_json::to_vec(&serde_json::json!({
        "binary_name": "ffmpeg",
        "arguments": ["-i", "in.mp4"],
        "paths": ["Movies"],
        "supported_transports": ["long_poll_http"],
        "heartbeat_interval": 30,
        "monitor": false,
    }))
    .unwrap();
    let req = signed_request(&client_signer, "alice", "POST", "/jobs/submit", submit_body);
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let submitted = body_json(response).await;
    let job_id = submitted["job_id"].as_str().unwrap().to_string();
    assert_eq!(submitted["status"], "pending");

    // Submission triggers assignment as a background task; wait for it
    // to land rather than assuming a synchronous assignment.
    let parsed_job_id: coordinator_protocol::JobId = job_id.parse().unwrap();
    let assigned = wait_for(|| {
        let job_store = job_store.clone();
        async move {
            let job = job_store.get_job(parsed_job_id).await.unwrap().unwrap();
            (job.status == coordinator_protocol::JobStatus::Assigned).then_some(job)
        }
    })
    .await
    .expect("job was assigned within the timeout");
    assert_eq!(assigned.worker_id.as_deref(), Some("worker-1"));

    let accept_path = format!("/jobs/{job_id}/accept");
    let req = signed_request(&worker_signer, "worker-1", "POST", &accept_path, Vec::new());
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status_path = format!("/jobs/{job_id}/status");
    let req = signed_request(&client_signer, "alice", "GET", &status_path, Vec::new());
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["status"], "running");
}

#[tokio::test]
async fn non_owner_cannot_accept_or_cancel_another_workers_job() {
    let state = test_state().await;
    let worker_signer = seed_identity(&state, "worker-1", Role::Worker).await;
    let other_worker_signer = seed_identity(&state, "worker-2", Role::Worker).await;
    let client_signer = seed_identity(&state, "alice", Role::Client).await;
    let app = routes::router(state);

    let register_body = serde_json::to_vec(&serde_json::json!({
        "worker_id": "worker-1",
        "capabilities": [],
        "binaries": ["ffmpeg"],
        "paths": [],
        "supported_transports": ["long_poll_http"],
        "registration_interval": 30,
        "version": null,
    }))
    .unwrap();
    let req = signed_request(&worker_signer, "worker-1", "POST", "/worker/register", register_body);
    app.clone().oneshot(req).await.unwrap();

    let submit_body = serde_json::to_vec(&serde_json::json!({
        "binary_name": "ffmpeg",
        "arguments": [],
        "paths": [],
        "supported_transports": ["long_poll_http"],
        "heartbeat_interval": null,
        "monitor": false,
    }))
    .unwrap();
    let req = signed_request(&client_signer, "alice", "POST", "/jobs/submit", submit_body);
    let response = app.clone().oneshot(req).await.unwrap();
    let submitted = body_json(response).await;
    let job_id = submitted["job_id"].as_str().unwrap().to_string();

    let accept_path = format!("/jobs/{job_id}/accept");
    let req = signed_request(&other_worker_signer, "worker-2", "POST", &accept_path, Vec::new());
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_is_unauthenticated_and_reports_online() {
    let state = test_state().await;
    let app = routes::router(state);

    let req = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "online");

    let req = Request::builder()
        .method("GET")
        .uri("/health?deep=true")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "online");
    assert_eq!(body["databases"]["primary"], true);
}
