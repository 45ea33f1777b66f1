//! Worker selection and placement for a single pending job. Invoked as a
//! background task from `submit` and again, by id, from the janitor's
//! pending-retry sweep — this module is the single authoritative
//! implementation of assignment, so both call sites agree on outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use coordinator_db::{JobStore, MessageStore, WorkerStore};
use coordinator_protocol::message::MessagePayload;
use coordinator_protocol::{Job, JobId, JobStatus, Message, MessageId, Worker};
use coordinator_transport::TransportRegistry;
use rand::seq::SliceRandom;

use crate::relay::{emit, StoreRecipientLookup};
use crate::CoreError;

/// Attempts to place `job_id` on a worker. Returns `true` if the job was
/// assigned, `false` if it was left `pending` (no online workers, no
/// matching candidate, the job is no longer pending, or a concurrent
/// writer won the CAS race. With no online or matching worker the job is
/// simply left pending for the janitor's retry sweep to pick up later.
pub async fn assign(
    job_id: JobId,
    job_store: &JobStore,
    worker_store: &WorkerStore,
    message_store: &MessageStore,
    registry: &TransportRegistry,
) -> Result<bool, CoreError> {
    let Some(job) = job_store.get_job(job_id).await? else {
        return Ok(false);
    };
    if job.status != JobStatus::Pending {
        return Ok(false);
    }

    let online = worker_store.get_workers_by_status(coordinator_protocol::WorkerStatus::Online).await?;
    if online.is_empty() {
        tracing::warn!(%job_id, "no online workers for job");
        return Ok(false);
    }

    let mut candidates: Vec<Worker> = online
        .into_iter()
        .filter(|w| w.can_run(&job.binary_name, &job.paths))
        .collect();
    if candidates.is_empty() {
        tracing::warn!(%job_id, "no workers match requirements for job");
        return Ok(false);
    }

    let load = job_store.get_worker_load().await?;

    // Shuffle first so the subsequent stable sorts' tie-breaks land on a
    // random order among exact ties: least-loaded wins, ties broken by
    // most-recent contact rounded to a minute, remaining ties random.
    candidates.shuffle(&mut rand::thread_rng());
    candidates.sort_by_key(|w| std::cmp::Reverse(truncate_to_minute(w.last_seen)));
    candidates.sort_by_key(|w| load.get(&w.worker_id).copied().unwrap_or(0));

    let selected = &candidates[0];
    let now = Utc::now();

    let cas_ok = job_store
        .update_status(job_id, JobStatus::Assigned, None, Some(&selected.worker_id), Some(JobStatus::Pending), now)
        .await?;
    if !cas_ok {
        tracing::info!(%job_id, "assignment CAS lost a race, leaving job for the next attempt");
        return Ok(false);
    }

    notify_assignment(&job, selected, job_id, now, message_store, registry, job_store, worker_store).await?;

    tracing::info!(%job_id, worker_id = %selected.worker_id, "assigned job to worker");
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn notify_assignment(
    job: &Job,
    worker: &Worker,
    job_id: JobId,
    now: DateTime<Utc>,
    message_store: &MessageStore,
    registry: &TransportRegistry,
    job_store: &JobStore,
    worker_store: &WorkerStore,
) -> Result<(), CoreError> {
    let lookup = StoreRecipientLookup::new(Arc::new(worker_store.clone()), Arc::new(job_store.clone()));

    let job_request = Message {
        message_id: MessageId::generate(),
        sender_id: None,
        recipient_id: worker.worker_id.clone(),
        job_id: Some(job_id),
        timestamp: now,
        payload: MessagePayload::JobRequest {
            binary_name: job.binary_name.clone(),
            arguments: job.arguments.clone(),
            paths: job.paths.iter().cloned().collect(),
            heartbeat_interval_secs: job.heartbeat_interval_secs,
        },
        sent_at: None,
    };
    emit(message_store, registry, &lookup, job_request).await?;

    let status_update = Message {
        message_id: MessageId::generate(),
        sender_id: None,
        recipient_id: job.requester_id.clone(),
        job_id: Some(job_id),
        timestamp: now,
        payload: MessagePayload::JobStatus {
            status: JobStatus::Assigned,
            exit_code: None,
        },
        sent_at: None,
    };
    emit(message_store, registry, &lookup, status_update).await?;

    Ok(())
}

fn truncate_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp - chrono::Duration::seconds(timestamp.timestamp() % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_test_utils::fixtures::{sample_job, sample_worker};

    async fn setup() -> (JobStore, WorkerStore, MessageStore, TransportRegistry) {
        let pool = coordinator_test_utils::memory_pool().await;
        let job_store = JobStore::new(pool.clone());
        let worker_store = WorkerStore::new(pool.clone());
        let message_store = MessageStore::new(pool.clone());
        let mut registry = TransportRegistry::new();
        registry.register(
            coordinator_protocol::TransportKind::LongPollHttp,
            std::sync::Arc::new(coordinator_transport::long_poll::LongPollTransport::new("/t")),
        );
        (job_store, worker_store, message_store, registry)
    }

    #[tokio::test]
    async fn assigns_to_sole_eligible_worker() {
        let (job_store, worker_store, message_store, registry) = setup().await;
        let worker = sample_worker("w1");
        worker_store.upsert_worker(&worker).await.unwrap();
        let job = sample_job("alice", "ffmpeg", &["Movies"]);
        job_store.create_job(&job).await.unwrap();

        let assigned = assign(job.job_id, &job_store, &worker_store, &message_store, &registry)
            .await
            .unwrap();
        assert!(assigned);

        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Assigned);
        assert_eq!(fetched.worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn leaves_pending_when_no_candidate_matches_paths() {
        let (job_store, worker_store, message_store, registry) = setup().await;
        let mut worker = sample_worker("w1");
        worker.paths = ["Other".to_string()].into_iter().collect();
        worker_store.upsert_worker(&worker).await.unwrap();
        let job = sample_job("alice", "ffmpeg", &["Movies"]);
        job_store.create_job(&job).await.unwrap();

        let assigned = assign(job.job_id, &job_store, &worker_store, &message_store, &registry)
            .await
            .unwrap();
        assert!(!assigned);
        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn prefers_least_loaded_worker() {
        let (job_store, worker_store, message_store, registry) = setup().await;
        worker_store.upsert_worker(&sample_worker("busy")).await.unwrap();
        worker_store.upsert_worker(&sample_worker("idle")).await.unwrap();

        let occupying = sample_job("bob", "ffmpeg", &["Movies"]);
        job_store.create_job(&occupying).await.unwrap();
        job_store
            .update_status(occupying.job_id, JobStatus::Assigned, None, Some("busy"), Some(JobStatus::Pending), Utc::now())
            .await
            .unwrap();

        let job = sample_job("alice", "ffmpeg", &["Movies"]);
        job_store.create_job(&job).await.unwrap();
        assign(job.job_id, &job_store, &worker_store, &message_store, &registry)
            .await
            .unwrap();

        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.worker_id.as_deref(), Some("idle"));
    }
}
