//! `/jobs/*` and `/poll/jobs/{id}`.
//!
//! Every handler here enforces the same ownership checks (403 for a
//! caller who isn't the bound worker/requester/admin, not 404), an
//! "already finished" idempotent short-circuit on `cancel`, and a
//! notify-requester-then-notify-worker ordering for a cancel with a
//! bound worker.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;

use coordinator_core::relay::{emit, StoreRecipientLookup};
use coordinator_core::scheduler;
use coordinator_protocol::http_types::{
    AckResponse, ClientHeartbeatRequest, FetchLogsQuery, FetchLogsResponse, JobStatusUpdateRequest, JobView,
    ListJobsQuery, ListJobsResponse, SubmitJobRequest, SubmitLogsRequest,
};
use coordinator_protocol::identity::{Role, SupportedTransports};
use coordinator_protocol::message::MessagePayload;
use coordinator_protocol::{Job, JobId, JobStatus, Message, MessageId};

use crate::auth_extractor::{Authed, AuthedJson};
use crate::error::ApiError;
use crate::state::AppState;

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| ApiError::Validation("invalid job id".to_string()))
}

async fn load_job(state: &AppState, job_id: JobId) -> Result<Job, ApiError> {
    state
        .job_store
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("job not found".to_string()))
}

fn lookup(state: &AppState) -> StoreRecipientLookup {
    StoreRecipientLookup::new(Arc::new(state.worker_store.clone()), Arc::new(state.job_store.clone()))
}

pub async fn submit(
    State(state): State<AppState>,
    AuthedJson(identity, payload): AuthedJson<SubmitJobRequest>,
) -> Result<Json<JobView>, ApiError> {
    let enabled = state.transport_registry.enabled_kinds();
    let negotiated = SupportedTransports(payload.supported_transports.clone())
        .negotiate(&enabled)
        .ok_or_else(|| {
            ApiError::Validation(format!(
                "no supported transport in {:?}",
                payload.supported_transports
            ))
        })?;

    let job_id = JobId::generate();
    let transport = state.transport_registry.get(negotiated)?;
    let transport_metadata = transport.get_metadata(&identity.client_id, Some(job_id));

    let now = Utc::now();
    let job = Job {
        job_id,
        requester_id: identity.client_id.clone(),
        binary_name: payload.binary_name,
        arguments: payload.arguments,
        paths: payload.paths,
        status: JobStatus::Pending,
        exit_code: None,
        worker_id: None,
        created_at: now,
        last_update: now,
        worker_last_seen: None,
        client_last_seen: None,
        binding: coordinator_protocol::TransportBinding {
            transport: negotiated,
            transport_metadata,
        },
        heartbeat_interval_secs: payload
            .heartbeat_interval
            .unwrap_or(state.config.default_heartbeat_interval_secs),
        monitor: payload.monitor,
    };
    state.job_store.create_job(&job).await?;

    // Fire-and-forget: a job left pending here is picked up by the next
    // janitor sweep regardless.
    tokio::spawn({
        let job_store = state.job_store.clone();
        let worker_store = state.worker_store.clone();
        let message_store = state.message_store.clone();
        let registry = state.transport_registry.clone();
        async move {
            if let Err(e) = scheduler::assign(job_id, &job_store, &worker_store, &message_store, &registry).await {
                tracing::warn!(%job_id, error = %e, "background assignment failed");
            }
        }
    });

    Ok(Json(JobView::from(job)))
}

pub async fn accept(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Authed(identity): Authed,
) -> Result<Json<AckResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_worker(&identity.client_id) {
        return Err(ApiError::Forbidden("not assigned to this job".to_string()));
    }

    let now = Utc::now();
    let moved = state
        .job_store
        .update_status(job_id, JobStatus::Running, None, Some(&identity.client_id), Some(JobStatus::Assigned), now)
        .await?;

    if !moved {
        // Lost the CAS race (e.g. the janitor requeued the job back to
        // pending in between the load above and this update): the store
        // is untouched, so there is nothing to tell the requester.
        return Ok(Json(AckResponse::ok_with_detail("job no longer assigned")));
    }

    emit(
        &state.message_store,
        &state.transport_registry,
        &lookup(&state),
        Message {
            message_id: MessageId::generate(),
            sender_id: Some(identity.client_id),
            recipient_id: job.requester_id,
            job_id: Some(job_id),
            timestamp: now,
            payload: MessagePayload::JobStatus {
                status: JobStatus::Running,
                exit_code: None,
            },
            sent_at: None,
        },
    )
    .await?;

    Ok(Json(AckResponse::ok()))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Authed(identity): Authed,
) -> Result<Json<AckResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_requester(&identity.client_id) && identity.role != Role::Admin {
        return Err(ApiError::Forbidden("no permission to cancel job".to_string()));
    }

    if job.status.is_terminal() {
        return Ok(Json(AckResponse::ok_with_detail("job already finished")));
    }

    let now = Utc::now();
    let lookup = lookup(&state);

    if let Some(worker_id) = job.worker_id.clone() {
        let moved = state
            .job_store
            .update_status(job_id, JobStatus::Canceling, None, Some(&worker_id), Some(job.status), now)
            .await?;

        if !moved {
            // The job moved off `job.status` between the load above and
            // this CAS (e.g. the worker's own status-update landed
            // first); nothing to cancel into, so skip the notifications.
            return Ok(Json(AckResponse::ok_with_detail("job already finished")));
        }

        emit(
            &state.message_store,
            &state.transport_registry,
            &lookup,
            Message {
                message_id: MessageId::generate(),
                sender_id: Some(identity.client_id.clone()),
                recipient_id: job.requester_id.clone(),
                job_id: Some(job_id),
                timestamp: now,
                payload: MessagePayload::JobStatus {
                    status: JobStatus::Canceling,
                    exit_code: None,
                },
                sent_at: None,
            },
        )
        .await?;

        emit(
            &state.message_store,
            &state.transport_registry,
            &lookup,
            Message {
                message_id: MessageId::generate(),
                sender_id: Some(identity.client_id),
                recipient_id: worker_id,
                job_id: Some(job_id),
                timestamp: now,
                payload: MessagePayload::JobStatus {
                    status: JobStatus::Canceling,
                    exit_code: None,
                },
                sent_at: None,
            },
        )
        .await?;
    } else {
        let moved = state
            .job_store
            .update_status(job_id, JobStatus::Canceled, None, None, Some(job.status), now)
            .await?;

        if !moved {
            return Ok(Json(AckResponse::ok_with_detail("job already finished")));
        }

        emit(
            &state.message_store,
            &state.transport_registry,
            &lookup,
            Message {
                message_id: MessageId::generate(),
                sender_id: Some(identity.client_id),
                recipient_id: job.requester_id,
                job_id: Some(job_id),
                timestamp: now,
                payload: MessagePayload::JobStatus {
                    status: JobStatus::Canceled,
                    exit_code: None,
                },
                sent_at: None,
            },
        )
        .await?;
    }

    Ok(Json(AckResponse::ok()))
}

pub async fn status_get(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Authed(identity): Authed,
) -> Result<Json<JobView>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    let is_party = job.worker_id.as_deref() == Some(identity.client_id.as_str()) || job.owned_by_requester(&identity.client_id);
    if !is_party && identity.role != Role::Admin {
        return Err(ApiError::Forbidden("no permission to job".to_string()));
    }

    Ok(Json(JobView::from(job)))
}

fn is_reportable_terminal_status(status: JobStatus) -> bool {
    matches!(status, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
}

pub async fn status_update(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    AuthedJson(identity, payload): AuthedJson<JobStatusUpdateRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    if !is_reportable_terminal_status(payload.status) {
        return Err(ApiError::Validation(format!(
            "status must be one of completed/failed/canceled, got {:?}",
            payload.status
        )));
    }

    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_worker(&identity.client_id) {
        return Err(ApiError::Forbidden("not assigned to this job".to_string()));
    }

    if job.status.is_terminal() {
        return Ok(Json(AckResponse::ok_with_detail("job already finished")));
    }

    let now = Utc::now();
    let moved = state
        .job_store
        .update_status(job_id, payload.status, payload.exit_code, Some(&identity.client_id), Some(job.status), now)
        .await?;

    if !moved {
        // Another request already moved the job off `job.status` (e.g. a
        // concurrent status-update or a janitor reap); the row is
        // unchanged by this call, so no message is emitted.
        return Ok(Json(AckResponse::ok_with_detail("job already finished")));
    }

    emit(
        &state.message_store,
        &state.transport_registry,
        &lookup(&state),
        Message {
            message_id: MessageId::generate(),
            sender_id: Some(identity.client_id),
            recipient_id: job.requester_id,
            job_id: Some(job_id),
            timestamp: now,
            payload: MessagePayload::JobStatus {
                status: payload.status,
                exit_code: payload.exit_code,
            },
            sent_at: None,
        },
    )
    .await?;

    Ok(Json(AckResponse::ok()))
}

fn is_heartbeatable_status(status: JobStatus) -> bool {
    matches!(status, JobStatus::Assigned | JobStatus::Running | JobStatus::Canceling)
}

/// `POST /jobs/{id}/heartbeat`: refreshes `worker_last_seen` only. Unlike
/// `status-update`, a heartbeat never changes job status and never emits a
/// message — it's purely a liveness signal the janitor's stale-running
/// reap consumes.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Authed(identity): Authed,
) -> Result<Json<AckResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_worker(&identity.client_id) {
        return Err(ApiError::Forbidden("not assigned to this job".to_string()));
    }

    if !is_heartbeatable_status(job.status) {
        return Ok(Json(AckResponse::ok_with_detail("job not in a heartbeatable state")));
    }

    state.job_store.update_worker_heartbeat(job_id, Utc::now()).await?;
    Ok(Json(AckResponse::ok()))
}

/// `POST /jobs/{id}/client_heartbeat`: keeps `client_last_seen` current
/// and lets a requester flip `monitor` after submission, mirroring the
/// worker heartbeat's shape.
pub async fn client_heartbeat(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    AuthedJson(identity, payload): AuthedJson<ClientHeartbeatRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_requester(&identity.client_id) && identity.role != Role::Admin {
        return Err(ApiError::Forbidden("no permission to job".to_string()));
    }

    state.job_store.update_client_heartbeat(job_id, payload.monitor, Utc::now()).await?;
    Ok(Json(AckResponse::ok()))
}

pub async fn logs_submit(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    AuthedJson(identity, payload): AuthedJson<SubmitLogsRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_worker(&identity.client_id) {
        return Err(ApiError::Forbidden("not assigned to this job".to_string()));
    }

    emit(
        &state.message_store,
        &state.transport_registry,
        &lookup(&state),
        Message {
            message_id: MessageId::generate(),
            sender_id: Some(identity.client_id),
            recipient_id: job.requester_id,
            job_id: Some(job_id),
            timestamp: Utc::now(),
            payload: MessagePayload::JobLogs { logs: payload.logs },
            sent_at: None,
        },
    )
    .await?;

    Ok(Json(AckResponse::ok()))
}

pub async fn logs_get(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<FetchLogsQuery>,
    Authed(identity): Authed,
) -> Result<Json<FetchLogsResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = load_job(&state, job_id).await?;

    if !job.owned_by_requester(&identity.client_id) && identity.role != Role::Admin {
        return Err(ApiError::Forbidden("no permission to view job logs".to_string()));
    }

    let since = query
        .since_message_id
        .as_deref()
        .map(|s| s.parse::<MessageId>())
        .transpose()
        .map_err(|e| ApiError::Validation(format!("invalid since_message_id: {e}")))?;
    let limit = query.limit.unwrap_or(state.config.list_default_limit);

    let messages = state.message_store.job_logs(job_id, since, limit).await?;
    let last_message_id = messages.last().map(|m| m.message_id.to_string());
    let logs = messages
        .into_iter()
        .filter_map(|m| match m.payload {
            MessagePayload::JobLogs { logs } => Some(logs),
            _ => None,
        })
        .flatten()
        .collect();

    Ok(Json(FetchLogsResponse { logs, last_message_id }))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
    Authed(_identity): Authed,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let since_id = query
        .since_id
        .as_deref()
        .map(|s| s.parse::<JobId>())
        .transpose()
        .map_err(|e| ApiError::Validation(format!("invalid since_id: {e}")))?;
    let limit = query.limit.unwrap_or(state.config.list_default_limit);
    let recent_window_seconds = query.recent_window_seconds.unwrap_or(state.config.recent_window_secs);

    let jobs = state
        .job_store
        .list_jobs(query.requester_id.as_deref(), limit, since_id, recent_window_seconds, Utc::now())
        .await?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobView::from).collect(),
    }))
}

/// `GET /poll/jobs/{id}`: same long-poll shape as
/// `/poll/worker`, scoped to one job's messages.
pub async fn poll_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<super::worker::PollQuery>,
    Authed(identity): Authed,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let since = query
        .last_message_id
        .as_deref()
        .map(|s| s.parse::<MessageId>())
        .transpose()
        .map_err(|e| ApiError::Validation(format!("invalid last_message_id: {e}")))?;
    let wait = Duration::from_secs(query.wait.unwrap_or(state.config.transports.long_poll.wait_secs));

    let messages = super::poll_until(&state, &identity.client_id, since, Some(job_id), wait).await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}
