//! Route handlers and the axum `Router` that wires them to their paths.

pub mod health;
pub mod job;
pub mod worker;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;

use coordinator_protocol::defaults::LONG_POLL_INTERNAL_WAKE_SECS;
use coordinator_protocol::{JobId, Message, MessageId};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/worker/register", post(worker::register))
        .route("/worker/deregister", post(worker::deregister))
        .route("/poll/worker", get(worker::poll_worker))
        .route("/jobs/submit", post(job::submit))
        .route("/jobs/:job_id/accept", post(job::accept))
        .route("/jobs/:job_id/cancel", post(job::cancel))
        .route("/jobs/:job_id/status", get(job::status_get).post(job::status_update))
        .route("/jobs/:job_id/heartbeat", post(job::heartbeat))
        .route("/jobs/:job_id/client_heartbeat", post(job::client_heartbeat))
        .route("/jobs/:job_id/logs", get(job::logs_get).post(job::logs_submit))
        .route("/jobs", get(job::list))
        .route("/poll/jobs/:job_id", get(job::poll_job))
        .route("/health", get(health::health))
        .with_state(state)
}

/// Shared long-poll loop for `/poll/worker` and `/poll/jobs/{id}`.
/// Registers interest before the first fetch so a `send` racing this
/// call isn't missed, then alternates "check the backlog" with "wait for a
/// notify or a bounded internal tick" until either messages appear or
/// `wait` elapses.
pub async fn poll_until(
    state: &AppState,
    recipient_id: &str,
    since: Option<MessageId>,
    job_id: Option<JobId>,
    wait: Duration,
) -> Result<Vec<Message>, ApiError> {
    let waiter_key = match job_id {
        Some(job_id) => format!("job:{job_id}"),
        None => recipient_id.to_string(),
    };
    let notify = state.long_poll.notify_for(&waiter_key);
    let deadline = tokio::time::Instant::now() + wait;
    let limit = state.config.list_default_limit;

    loop {
        let messages = state.message_store.pending_for_recipient(recipient_id, since, job_id, limit).await?;
        if !messages.is_empty() {
            let ids: Vec<MessageId> = messages.iter().map(|m| m.message_id).collect();
            state.message_store.mark_delivered(&ids, Utc::now()).await?;
            return Ok(messages);
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(Vec::new());
        }

        let remaining = deadline - now;
        let tick = Duration::from_secs(LONG_POLL_INTERNAL_WAKE_SECS).min(remaining);
        let _ = tokio::time::timeout(tick, notify.notified()).await;
    }
}
