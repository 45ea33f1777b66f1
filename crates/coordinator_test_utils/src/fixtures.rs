//! Sample entity builders. Each returns a value with sensible defaults;
//! tests override the one or two fields the case is actually about.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use coordinator_protocol::identity::Role;
use coordinator_protocol::transport::{TransportBinding, TransportKind};
use coordinator_protocol::{Identity, Job, JobId, JobStatus, Worker, WorkerStatus};

pub fn sample_worker(worker_id: &str) -> Worker {
    Worker {
        worker_id: worker_id.to_string(),
        status: WorkerStatus::Online,
        last_seen: Utc::now(),
        capabilities: ["transcode".to_string()].into_iter().collect(),
        binaries: ["ffmpeg".to_string()].into_iter().collect(),
        paths: ["Movies".to_string()].into_iter().collect(),
        binding: TransportBinding {
            transport: TransportKind::LongPollHttp,
            transport_metadata: HashMap::new(),
        },
        registration_interval_secs: 30,
        version: Some("1.0.0".to_string()),
    }
}

pub fn sample_job(requester_id: &str, binary_name: &str, paths: &[&str]) -> Job {
    let now = Utc::now();
    let paths: BTreeSet<String> = paths.iter().map(|p| p.to_string()).collect();
    Job {
        job_id: JobId::generate(),
        requester_id: requester_id.to_string(),
        binary_name: binary_name.to_string(),
        arguments: vec!["-i".to_string(), "in.mp4".to_string()],
        paths,
        status: JobStatus::Pending,
        exit_code: None,
        worker_id: None,
        created_at: now,
        last_update: now,
        worker_last_seen: None,
        client_last_seen: None,
        binding: TransportBinding {
            transport: TransportKind::LongPollHttp,
            transport_metadata: HashMap::new(),
        },
        heartbeat_interval_secs: 30,
        monitor: false,
    }
}

pub fn sample_identity(client_id: &str, role: Role) -> Identity {
    Identity {
        client_id: client_id.to_string(),
        role,
        hmac_key: [7u8; 32],
        key_wrap_id: None,
        allowed_cidrs: Identity::default_cidrs(),
    }
}
