//! `/worker/*` and `/poll/worker`.
//!
//! `register` checks the declared `worker_id` against the authenticated
//! client id, negotiates a transport, and upserts the worker wholesale.
//! `deregister` and `poll_worker` share their shape with the job-side
//! handlers: a plain store clear, and the common long-poll loop.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use coordinator_protocol::http_types::{DeregisterWorkerRequest, RegisterWorkerRequest, RegisterWorkerResponse};
use coordinator_protocol::identity::{Role, SupportedTransports};
use coordinator_protocol::transport::TransportBinding;
use coordinator_protocol::worker::WorkerStatus;
use coordinator_protocol::{MessageId, Worker};

use crate::auth_extractor::{Authed, AuthedJson};
use crate::error::ApiError;
use crate::state::AppState;

/// Intersection with an empty allow-list is "no restriction".
fn allowed_binaries(declared: BTreeSet<String>, allowlist: &BTreeSet<String>) -> BTreeSet<String> {
    if allowlist.is_empty() {
        declared
    } else {
        declared.into_iter().filter(|b| allowlist.contains(b)).collect()
    }
}

pub async fn register(
    State(state): State<AppState>,
    AuthedJson(identity, payload): AuthedJson<RegisterWorkerRequest>,
) -> Result<Json<RegisterWorkerResponse>, ApiError> {
    if identity.client_id != payload.worker_id {
        return Err(ApiError::Forbidden("worker_id does not match authenticated client_id".to_string()));
    }

    let enabled = state.transport_registry.enabled_kinds();
    let negotiated = SupportedTransports(payload.supported_transports.clone())
        .negotiate(&enabled)
        .ok_or_else(|| {
            ApiError::Validation(format!(
                "no supported transport in {:?}",
                payload.supported_transports
            ))
        })?;

    let transport = state.transport_registry.get(negotiated)?;
    let transport_metadata = transport.get_metadata(&payload.worker_id, None);

    let worker = Worker {
        worker_id: payload.worker_id.clone(),
        status: WorkerStatus::Online,
        last_seen: Utc::now(),
        capabilities: payload.capabilities,
        binaries: allowed_binaries(payload.binaries, &state.config.binary_allowlist),
        paths: payload.paths,
        binding: TransportBinding {
            transport: negotiated,
            transport_metadata: transport_metadata.clone(),
        },
        registration_interval_secs: payload
            .registration_interval
            .unwrap_or(state.config.default_registration_interval_secs),
        version: payload.version,
    };
    state.worker_store.upsert_worker(&worker).await?;

    Ok(Json(RegisterWorkerResponse {
        transport: negotiated,
        transport_metadata,
    }))
}

pub async fn deregister(
    State(state): State<AppState>,
    AuthedJson(identity, payload): AuthedJson<DeregisterWorkerRequest>,
) -> Result<Json<coordinator_protocol::http_types::AckResponse>, ApiError> {
    if identity.client_id != payload.worker_id && identity.role != Role::Admin {
        return Err(ApiError::Forbidden("worker_id does not match authenticated client_id".to_string()));
    }
    state.worker_store.mark_offline_and_clear(&payload.worker_id).await?;
    Ok(Json(coordinator_protocol::http_types::AckResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub last_message_id: Option<String>,
    pub wait: Option<u64>,
}

/// `GET /poll/worker`: blocks up to `wait` seconds for new messages
/// addressed to the caller, waking early on a `send`-triggered notify,
/// and marks whatever it returns as delivered.
pub async fn poll_worker(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    Authed(identity): Authed,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = query
        .last_message_id
        .as_deref()
        .map(|s| s.parse::<MessageId>())
        .transpose()
        .map_err(|e| ApiError::Validation(format!("invalid last_message_id: {e}")))?;
    let wait = Duration::from_secs(query.wait.unwrap_or(state.config.transports.long_poll.wait_secs));

    let messages = super::poll_until(&state, &identity.client_id, since, None, wait).await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}
