//! Persist-then-dispatch helper shared by the scheduler, the janitor, and
//! (via this crate) the HTTP handlers: every relay message goes through
//! `emit`, never through the transport fabric directly, so a message is
//! always durable before a delivery attempt is ever made.

use std::sync::Arc;

use chrono::Utc;
use coordinator_db::{JobStore, MessageStore, WorkerStore};
use coordinator_protocol::{JobId, Message, TransportBinding};
use coordinator_transport::dispatch::{dispatch, RecipientLookup};
use coordinator_transport::TransportRegistry;

use crate::CoreError;

/// Resolves a recipient's bound transport by consulting the worker store
/// first, then the job store — a worker id always wins if one exists,
/// since a job's own binding only matters when addressing its requester.
pub struct StoreRecipientLookup {
    worker_store: Arc<WorkerStore>,
    job_store: Arc<JobStore>,
}

impl StoreRecipientLookup {
    pub fn new(worker_store: Arc<WorkerStore>, job_store: Arc<JobStore>) -> Self {
        Self { worker_store, job_store }
    }
}

#[async_trait::async_trait]
impl RecipientLookup for StoreRecipientLookup {
    async fn worker_binding(&self, worker_id: &str) -> Option<TransportBinding> {
        self.worker_store
            .get_worker(worker_id)
            .await
            .ok()
            .flatten()
            .map(|w| w.binding)
    }

    async fn job_binding(&self, job_id: JobId) -> Option<TransportBinding> {
        self.job_store.get_job(job_id).await.ok().flatten().map(|j| j.binding)
    }
}

/// Persist `message`, then attempt delivery through `registry` via
/// `lookup`. Flips `sent_at` immediately when a push transport (topic
/// broker, pub/sub) confirms acceptance; a pull transport (long-poll)
/// leaves `sent_at` null for its own handler to flip when it actually
/// drains the backlog.
pub async fn emit(
    message_store: &MessageStore,
    registry: &TransportRegistry,
    lookup: &dyn RecipientLookup,
    message: Message,
) -> Result<(), CoreError> {
    message_store.append(&message).await?;

    let binding = if let Some(binding) = lookup.worker_binding(&message.recipient_id).await {
        Some(binding)
    } else {
        match message.job_id {
            Some(job_id) => lookup.job_binding(job_id).await,
            None => None,
        }
    };

    let delivered = dispatch(&message, registry, lookup).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, message_id = %message.message_id, "transport send failed");
        false
    });

    if delivered {
        if let Some(binding) = binding {
            if binding.transport.is_push() {
                message_store.mark_delivered(&[message.message_id], Utc::now()).await?;
            }
        }
    }

    Ok(())
}
