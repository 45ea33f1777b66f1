//! A periodic reconciliation loop that sweeps stale workers and jobs in
//! five phases, driven by an owned background task rather than a
//! request-triggered check.

use std::sync::Arc;

use chrono::Utc;
use coordinator_db::{JobStore, MessageStore, WorkerStore};
use coordinator_protocol::message::MessagePayload;
use coordinator_protocol::{JobStatus, Message, MessageId};
use coordinator_transport::TransportRegistry;
use rand::Rng;

use crate::relay::{emit, StoreRecipientLookup};
use crate::scheduler;
use crate::CoreError;

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub interval_secs: u64,
    pub jitter_secs: u64,
    pub worker_reap_threshold: f64,
    pub job_heartbeat_reap_threshold: f64,
    pub client_heartbeat_reap_threshold: f64,
    pub assignment_timeout_secs: i64,
    pub pending_retry_delay_secs: i64,
    pub pending_timeout_secs: i64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        use coordinator_protocol::defaults::*;
        Self {
            interval_secs: DEFAULT_JANITOR_INTERVAL_SECS,
            jitter_secs: DEFAULT_JANITOR_JITTER_SECS,
            worker_reap_threshold: DEFAULT_WORKER_REAP_THRESHOLD,
            job_heartbeat_reap_threshold: DEFAULT_HEARTBEAT_REAP_THRESHOLD,
            client_heartbeat_reap_threshold: DEFAULT_CLIENT_HEARTBEAT_REAP_THRESHOLD,
            assignment_timeout_secs: DEFAULT_ASSIGNMENT_TIMEOUT_SECS,
            pending_retry_delay_secs: DEFAULT_PENDING_RETRY_DELAY_SECS,
            pending_timeout_secs: DEFAULT_PENDING_TIMEOUT_SECS,
        }
    }
}

pub struct Janitor {
    job_store: JobStore,
    worker_store: WorkerStore,
    message_store: MessageStore,
    registry: Arc<TransportRegistry>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(
        job_store: JobStore,
        worker_store: WorkerStore,
        message_store: MessageStore,
        registry: Arc<TransportRegistry>,
        config: JanitorConfig,
    ) -> Self {
        Self {
            job_store,
            worker_store,
            message_store,
            registry,
            config,
        }
    }

    fn lookup(&self) -> StoreRecipientLookup {
        StoreRecipientLookup::new(Arc::new(self.worker_store.clone()), Arc::new(self.job_store.clone()))
    }

    /// Runs the five reap phases forever, sleeping `interval ± jitter`
    /// between passes, logging and continuing past any single pass's
    /// error rather than letting it kill the loop.
    pub async fn run(&self) {
        tracing::info!("janitor started");
        let jitter_bound = (0.5 * self.config.interval_secs as f64).min(self.config.jitter_secs as f64);
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "error in janitor pass");
            }

            let jitter = rand::thread_rng().gen_range(-jitter_bound..=jitter_bound);
            let sleep_secs = (self.config.interval_secs as f64 + jitter).max(1.0);
            tokio::time::sleep(std::time::Duration::from_secs_f64(sleep_secs)).await;
        }
    }

    async fn tick(&self) -> Result<(), CoreError> {
        self.reap_workers().await?;
        self.reap_running_jobs().await?;
        self.reap_assigned_jobs().await?;
        self.reap_pending_jobs().await?;
        self.reap_abandoned_monitored_jobs().await?;
        Ok(())
    }

    /// Phase 1: workers that have missed their registration interval by
    /// `worker_reap_threshold` go offline and lose their declared
    /// capabilities, matching a deregistration.
    async fn reap_workers(&self) -> Result<(), CoreError> {
        let stale = self
            .worker_store
            .get_stale_workers(self.config.worker_reap_threshold)
            .await?;
        for worker in stale {
            tracing::warn!(worker_id = %worker.worker_id, "worker is stale, marking offline");
            self.worker_store.mark_offline_and_clear(&worker.worker_id).await?;
        }
        Ok(())
    }

    /// Phase 2: running jobs whose worker heartbeat has gone quiet fail,
    /// and both requester and worker (if still reachable) are notified.
    async fn reap_running_jobs(&self) -> Result<(), CoreError> {
        let stale = self
            .job_store
            .get_stale_running_jobs(self.config.job_heartbeat_reap_threshold)
            .await?;
        let lookup = self.lookup();
        for job in stale {
            let now = Utc::now();
            let ok = self
                .job_store
                .update_status(job.job_id, JobStatus::Failed, None, None, Some(JobStatus::Running), now)
                .await?;
            if !ok {
                continue;
            }
            tracing::warn!(job_id = %job.job_id, "job timed out, marked failed");

            emit(&self.message_store, &self.registry, &lookup, status_message(&job.requester_id, job.job_id, JobStatus::Failed, now))
                .await?;
            if let Some(worker_id) = &job.worker_id {
                emit(&self.message_store, &self.registry, &lookup, status_message(worker_id, job.job_id, JobStatus::Failed, now)).await?;
            }
        }
        Ok(())
    }

    /// Phase 3: assigned jobs not accepted within `assignment_timeout_secs`
    /// return to `pending`; the worker (who may still come back and try to
    /// accept) is told the assignment is void.
    async fn reap_assigned_jobs(&self) -> Result<(), CoreError> {
        let stale = self
            .job_store
            .get_stale_assigned_jobs(self.config.assignment_timeout_secs)
            .await?;
        let lookup = self.lookup();
        for job in stale {
            let now = Utc::now();
            let ok = self
                .job_store
                .update_status(job.job_id, JobStatus::Pending, None, None, Some(JobStatus::Assigned), now)
                .await?;
            if !ok {
                continue;
            }
            tracing::warn!(job_id = %job.job_id, "job assignment timed out, requeued as pending");

            if let Some(worker_id) = &job.worker_id {
                emit(&self.message_store, &self.registry, &lookup, status_message(worker_id, job.job_id, JobStatus::Canceled, now)).await?;
            }
        }
        Ok(())
    }

    /// Phase 4: pending jobs in the retry band get a fresh
    /// `scheduler::assign` attempt; pending jobs past the full timeout
    /// fail outright.
    async fn reap_pending_jobs(&self) -> Result<(), CoreError> {
        let retry_band = self
            .job_store
            .get_stale_pending_jobs(self.config.pending_retry_delay_secs, Some(self.config.pending_timeout_secs))
            .await?;
        for job in retry_band {
            scheduler::assign(job.job_id, &self.job_store, &self.worker_store, &self.message_store, &self.registry).await?;
        }

        let expired = self
            .job_store
            .get_stale_pending_jobs(self.config.pending_timeout_secs, None)
            .await?;
        let lookup = self.lookup();
        for job in expired {
            let now = Utc::now();
            let ok = self
                .job_store
                .update_status(job.job_id, JobStatus::Failed, None, None, Some(JobStatus::Pending), now)
                .await?;
            if !ok {
                continue;
            }
            tracing::warn!(job_id = %job.job_id, "job pending timeout, marked failed");
            emit(&self.message_store, &self.registry, &lookup, status_message(&job.requester_id, job.job_id, JobStatus::Failed, now))
                .await?;
        }
        Ok(())
    }

    /// Phase 5: jobs under client monitoring whose client has stopped
    /// heartbeating move to `canceling` regardless of their current active
    /// status — there is no single prior status to gate on, so this is
    /// the one unconditional CAS in the janitor.
    async fn reap_abandoned_monitored_jobs(&self) -> Result<(), CoreError> {
        let abandoned = self
            .job_store
            .get_stale_monitored_jobs(self.config.client_heartbeat_reap_threshold)
            .await?;
        let lookup = self.lookup();
        for job in abandoned {
            let now = Utc::now();
            let ok = self
                .job_store
                .update_status(job.job_id, JobStatus::Canceling, None, None, None, now)
                .await?;
            if !ok {
                continue;
            }
            tracing::warn!(job_id = %job.job_id, "job abandoned by client, canceling");

            emit(&self.message_store, &self.registry, &lookup, status_message(&job.requester_id, job.job_id, JobStatus::Canceling, now))
                .await?;
            if let Some(worker_id) = &job.worker_id {
                emit(&self.message_store, &self.registry, &lookup, status_message(worker_id, job.job_id, JobStatus::Canceling, now)).await?;
            }
        }
        Ok(())
    }
}

fn status_message(recipient_id: &str, job_id: coordinator_protocol::JobId, status: JobStatus, now: chrono::DateTime<Utc>) -> Message {
    Message {
        message_id: MessageId::generate(),
        sender_id: None,
        recipient_id: recipient_id.to_string(),
        job_id: Some(job_id),
        timestamp: now,
        payload: MessagePayload::JobStatus { status, exit_code: None },
        sent_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_protocol::TransportKind;
    use coordinator_test_utils::fixtures::{sample_job, sample_worker};

    async fn janitor_with(config: JanitorConfig) -> (Janitor, JobStore, WorkerStore) {
        let pool = coordinator_test_utils::memory_pool().await;
        let job_store = JobStore::new(pool.clone());
        let worker_store = WorkerStore::new(pool.clone());
        let message_store = MessageStore::new(pool.clone());
        let mut registry = TransportRegistry::new();
        registry.register(
            TransportKind::LongPollHttp,
            std::sync::Arc::new(coordinator_transport::long_poll::LongPollTransport::new("/t")),
        );
        let janitor = Janitor::new(job_store.clone(), worker_store.clone(), message_store, Arc::new(registry), config);
        (janitor, job_store, worker_store)
    }

    #[tokio::test]
    async fn reaps_stale_worker_and_clears_its_declarations() {
        let (janitor, _job_store, worker_store) = janitor_with(JanitorConfig {
            worker_reap_threshold: 0.0,
            ..JanitorConfig::default()
        })
        .await;
        let mut worker = sample_worker("w1");
        worker.last_seen = Utc::now() - chrono::Duration::seconds(3600);
        worker_store.upsert_worker(&worker).await.unwrap();

        janitor.reap_workers().await.unwrap();

        let fetched = worker_store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(fetched.status, coordinator_protocol::WorkerStatus::Offline);
        assert!(fetched.binaries.is_empty());
    }

    #[tokio::test]
    async fn fails_stale_running_job_and_notifies() {
        let (janitor, job_store, worker_store) = janitor_with(JanitorConfig {
            job_heartbeat_reap_threshold: 0.0,
            ..JanitorConfig::default()
        })
        .await;
        worker_store.upsert_worker(&sample_worker("w1")).await.unwrap();
        let mut job = sample_job("alice", "ffmpeg", &["Movies"]);
        job.status = JobStatus::Running;
        job.worker_id = Some("w1".to_string());
        job.worker_last_seen = Some(Utc::now() - chrono::Duration::seconds(3600));
        job_store.create_job(&job).await.unwrap();

        janitor.reap_running_jobs().await.unwrap();

        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn requeues_stale_assigned_job_as_pending() {
        let (janitor, job_store, _worker_store) = janitor_with(JanitorConfig {
            assignment_timeout_secs: 0,
            ..JanitorConfig::default()
        })
        .await;
        let mut job = sample_job("alice", "ffmpeg", &["Movies"]);
        job.status = JobStatus::Assigned;
        job.worker_id = Some("w1".to_string());
        job.last_update = Utc::now() - chrono::Duration::seconds(3600);
        job_store.create_job(&job).await.unwrap();

        janitor.reap_assigned_jobs().await.unwrap();

        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn fails_pending_job_past_full_timeout() {
        let (janitor, job_store, _worker_store) = janitor_with(JanitorConfig {
            pending_timeout_secs: 0,
            ..JanitorConfig::default()
        })
        .await;
        let mut job = sample_job("alice", "ffmpeg", &["Movies"]);
        job.created_at = Utc::now() - chrono::Duration::seconds(3600);
        job.last_update = job.created_at;
        job_store.create_job(&job).await.unwrap();

        janitor.reap_pending_jobs().await.unwrap();

        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancels_abandoned_monitored_job() {
        let (janitor, job_store, worker_store) = janitor_with(JanitorConfig {
            client_heartbeat_reap_threshold: 0.0,
            ..JanitorConfig::default()
        })
        .await;
        worker_store.upsert_worker(&sample_worker("w1")).await.unwrap();
        let mut job = sample_job("alice", "ffmpeg", &["Movies"]);
        job.status = JobStatus::Running;
        job.worker_id = Some("w1".to_string());
        job.monitor = true;
        job.client_last_seen = Some(Utc::now() - chrono::Duration::seconds(3600));
        job_store.create_job(&job).await.unwrap();

        janitor.reap_abandoned_monitored_jobs().await.unwrap();

        let fetched = job_store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Canceling);
    }
}
