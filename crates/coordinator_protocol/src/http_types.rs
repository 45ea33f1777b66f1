//! JSON request/response bodies for the HTTP surface: plain serde structs,
//! one per endpoint, kept separate from the domain types in `job`/`worker`/
//! `identity` so the wire shape can evolve independently of storage shape.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Role;
use crate::ids::JobId;
use crate::job::{Job, JobStatus};
use crate::message::LogEntry;
use crate::transport::TransportKind;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub capabilities: BTreeSet<String>,
    pub binaries: BTreeSet<String>,
    pub paths: BTreeSet<String>,
    pub supported_transports: Vec<TransportKind>,
    pub registration_interval: Option<u32>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterWorkerResponse {
    pub transport: TransportKind,
    pub transport_metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeregisterWorkerRequest {
    pub worker_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    pub binary_name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub paths: BTreeSet<String>,
    pub supported_transports: Vec<TransportKind>,
    pub heartbeat_interval: Option<u32>,
    #[serde(default)]
    pub monitor: bool,
}

/// The full job record returned by `submit`, `GET /jobs/{id}/status`, and
/// as an element of the `GET /jobs` listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub requester_id: String,
    pub binary_name: String,
    pub arguments: Vec<String>,
    pub paths: BTreeSet<String>,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub worker_last_seen: Option<DateTime<Utc>>,
    pub client_last_seen: Option<DateTime<Utc>>,
    pub transport: TransportKind,
    pub transport_metadata: HashMap<String, serde_json::Value>,
    pub heartbeat_interval: u32,
    pub monitor: bool,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            requester_id: job.requester_id,
            binary_name: job.binary_name,
            arguments: job.arguments,
            paths: job.paths,
            status: job.status,
            exit_code: job.exit_code,
            worker_id: job.worker_id,
            created_at: job.created_at,
            last_update: job.last_update,
            worker_last_seen: job.worker_last_seen,
            client_last_seen: job.client_last_seen,
            transport: job.binding.transport,
            transport_metadata: job.binding.transport_metadata,
            heartbeat_interval: job.heartbeat_interval_secs,
            monitor: job.monitor,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusUpdateRequest {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientHeartbeatRequest {
    pub monitor: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitLogsRequest {
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchLogsQuery {
    pub since_message_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchLogsResponse {
    pub logs: Vec<LogEntry>,
    pub last_message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<u32>,
    pub since_id: Option<String>,
    pub requester_id: Option<String>,
    pub recent_window_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub deep: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<HashMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transports: Option<HashMap<String, bool>>,
}

/// A simple `{ok: true}`/`{ok: true, detail: "..."}` acknowledgement used
/// by every mutation endpoint that has nothing richer to return.
#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { ok: true, detail: None }
    }

    pub fn ok_with_detail(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: Some(detail.into()),
        }
    }
}

/// Identity view for the admin identity-inspection endpoint. Never carries
/// `hmac_key` unless `include_secret` is explicitly requested by an admin
/// caller — enforced by only ever constructing the `Some` variant from
/// that one call site.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityView {
    pub client_id: String,
    pub role: Role,
    pub key_wrap_id: Option<String>,
    pub allowed_cidrs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_key_base64: Option<String>,
}
