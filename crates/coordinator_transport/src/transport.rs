use std::collections::HashMap;

use async_trait::async_trait;
use coordinator_protocol::{JobId, Message};
use serde_json::Value;

use crate::error::TransportError;

/// A pluggable delivery mechanism named at startup and chosen by
/// negotiation. A coordinator process may have several of these
/// registered at once, keyed by `coordinator_protocol::TransportKind`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// One-time setup performed when the transport is registered (e.g.
    /// declaring exchanges, connecting a client). Idempotent: called again
    /// on reconnect after a dropped broker connection.
    async fn setup(&self) -> Result<(), TransportError>;

    /// Attempt delivery. `transport_metadata` is the recipient's bound
    /// metadata from `get_metadata` at registration/submission time.
    /// Returns whether the transport believes the message was accepted —
    /// this never gates persistence, since the caller always durably
    /// records a message before invoking `send`.
    async fn send(
        &self,
        message: &Message,
        transport_metadata: &HashMap<String, Value>,
    ) -> Result<bool, TransportError>;

    /// Transport-specific binding metadata handed back to a worker/client
    /// at registration/submission time and stored alongside the job or
    /// worker record.
    fn get_metadata(&self, recipient_id: &str, job_id: Option<JobId>) -> HashMap<String, Value>;

    async fn health_check(&self) -> Result<bool, TransportError>;
}
