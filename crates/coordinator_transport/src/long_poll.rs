//! Long-poll HTTP transport: the coordinator doesn't push
//! anything over the wire here. `send` only wakes whichever `Notify` the
//! recipient's blocked `GET` handler is waiting on; the handler itself
//! (in `coordinatord`) drains the message store once woken.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use coordinator_protocol::{JobId, Message};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::transport::Transport;

/// Keys a waiter by the same string a long-poll `GET` handler should look
/// itself up under: a worker id, or `job:<job_id>` for a per-job listener.
fn waiter_key(message: &Message) -> String {
    match message.job_id {
        Some(job_id) => format!("job:{job_id}"),
        None => message.recipient_id.clone(),
    }
}

pub struct LongPollTransport {
    base_path: String,
    waiters: Mutex<HashMap<String, Arc<Notify>>>,
}

impl LongPollTransport {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Called by the long-poll HTTP handler before it starts waiting, so a
    /// `send` racing the handler's setup can't be missed.
    pub fn notify_for(&self, key: &str) -> Arc<Notify> {
        let mut waiters = self.waiters.lock().expect("waiters mutex poisoned");
        waiters.entry(key.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }
}

#[async_trait]
impl Transport for LongPollTransport {
    async fn setup(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(
        &self,
        message: &Message,
        _transport_metadata: &HashMap<String, Value>,
    ) -> Result<bool, TransportError> {
        let key = waiter_key(message);
        if let Some(notify) = self.waiters.lock().expect("waiters mutex poisoned").get(&key) {
            notify.notify_waiters();
        }
        // A waiter not currently parked isn't a delivery failure — the
        // message is already persisted and will surface on the recipient's
        // next poll regardless.
        Ok(true)
    }

    fn get_metadata(&self, recipient_id: &str, job_id: Option<JobId>) -> HashMap<String, Value> {
        let path = match job_id {
            Some(job_id) => format!("{}/jobs/{}", self.base_path, job_id),
            None => format!("{}/worker/{}", self.base_path, recipient_id),
        };
        HashMap::from([("path".to_string(), json!(path))])
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_protocol::message::MessagePayload;
    use coordinator_protocol::{JobStatus, MessageId};
    use chrono::Utc;

    fn sample_message(job_id: Option<JobId>, recipient_id: &str) -> Message {
        Message {
            message_id: MessageId::generate(),
            sender_id: None,
            recipient_id: recipient_id.to_string(),
            job_id,
            timestamp: Utc::now(),
            payload: MessagePayload::JobStatus {
                status: JobStatus::Running,
                exit_code: None,
            },
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn send_wakes_registered_waiter() {
        let transport = LongPollTransport::new("/transport/long-poll");
        let notify = transport.notify_for("worker-1");

        let waited = tokio::spawn({
            let notify = notify.clone();
            async move {
                tokio::time::timeout(std::time::Duration::from_secs(1), notify.notified())
                    .await
                    .is_ok()
            }
        });

        transport.send(&sample_message(None, "worker-1"), &HashMap::new()).await.unwrap();
        assert!(waited.await.unwrap());
    }

    #[test]
    fn get_metadata_distinguishes_worker_and_job_paths() {
        let transport = LongPollTransport::new("/transport/long-poll");
        let worker_meta = transport.get_metadata("worker-1", None);
        assert_eq!(worker_meta["path"], json!("/transport/long-poll/worker/worker-1"));

        let job_id = JobId::generate();
        let job_meta = transport.get_metadata("alice", Some(job_id));
        assert_eq!(job_meta["path"], json!(format!("/transport/long-poll/jobs/{job_id}")));
    }
}
