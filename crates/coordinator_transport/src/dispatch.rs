//! Recipient-kind-aware dispatch:
//!
//! - If the recipient is a worker (a binding is on record for its id), send
//!   via that worker's bound transport/metadata.
//! - Else if the message carries a `job_id`, use the job's bound transport
//!   (the requester-side binding).
//! - Else the message is undeliverable by push; it still persists (the
//!   caller is responsible for that — this module only pushes).
//!
//! This crate has no storage dependency of its own, so the lookup is a
//! trait the caller (`coordinator_core`) implements over its stores.

use async_trait::async_trait;
use coordinator_protocol::{JobId, Message, TransportBinding};

use crate::error::TransportError;
use crate::registry::TransportRegistry;

#[async_trait]
pub trait RecipientLookup: Send + Sync {
    async fn worker_binding(&self, worker_id: &str) -> Option<TransportBinding>;
    async fn job_binding(&self, job_id: JobId) -> Option<TransportBinding>;
}

/// Resolve the binding for `message.recipient_id` and push it through the
/// matching registered transport. Returns `Ok(false)` (not an error) when
/// the message has no resolvable binding — that's the "undeliverable by
/// push, still persisted" case, not a transport failure.
pub async fn dispatch(
    message: &Message,
    registry: &TransportRegistry,
    lookup: &dyn RecipientLookup,
) -> Result<bool, TransportError> {
    let binding = if let Some(binding) = lookup.worker_binding(&message.recipient_id).await {
        Some(binding)
    } else if let Some(job_id) = message.job_id {
        lookup.job_binding(job_id).await
    } else {
        None
    };

    let Some(binding) = binding else {
        return Ok(false);
    };

    let transport = registry.get(binding.transport)?;
    transport.send(message, &binding.transport_metadata).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::long_poll::LongPollTransport;
    use coordinator_protocol::message::MessagePayload;
    use coordinator_protocol::{JobStatus, MessageId, TransportKind};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct FixedLookup {
        worker: Option<TransportBinding>,
        job: Option<TransportBinding>,
    }

    #[async_trait]
    impl RecipientLookup for FixedLookup {
        async fn worker_binding(&self, _worker_id: &str) -> Option<TransportBinding> {
            self.worker.clone()
        }

        async fn job_binding(&self, _job_id: JobId) -> Option<TransportBinding> {
            self.job.clone()
        }
    }

    fn sample_message(job_id: Option<JobId>, recipient_id: &str) -> Message {
        Message {
            message_id: MessageId::generate(),
            sender_id: None,
            recipient_id: recipient_id.to_string(),
            job_id,
            timestamp: chrono::Utc::now(),
            payload: MessagePayload::JobStatus {
                status: JobStatus::Running,
                exit_code: None,
            },
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn undeliverable_when_no_binding_resolves() {
        let mut registry = TransportRegistry::new();
        registry.register(TransportKind::LongPollHttp, Arc::new(LongPollTransport::new("/t")));
        let lookup = FixedLookup { worker: None, job: None };

        let delivered = dispatch(&sample_message(None, "ghost"), &registry, &lookup).await.unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn worker_binding_takes_priority_over_job_binding() {
        let mut registry = TransportRegistry::new();
        registry.register(TransportKind::LongPollHttp, Arc::new(LongPollTransport::new("/t")));
        let lookup = FixedLookup {
            worker: Some(TransportBinding {
                transport: TransportKind::LongPollHttp,
                transport_metadata: HashMap::new(),
            }),
            job: Some(TransportBinding {
                transport: TransportKind::LongPollHttp,
                transport_metadata: HashMap::new(),
            }),
        };

        let job_id = JobId::generate();
        let delivered = dispatch(&sample_message(Some(job_id), "w1"), &registry, &lookup)
            .await
            .unwrap();
        assert!(delivered);
    }
}
