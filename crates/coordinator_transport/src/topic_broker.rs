//! AMQP-style topic-broker transport, backed by `lapin`.
//!
//! Workers bind a durable, non-auto-delete queue named `worker.<worker_id>`;
//! clients bind an ephemeral, auto-delete queue named
//! `job.<requester_id>.<job_id>`. Both are bound to one topic exchange with
//! a routing key of the same shape, so the coordinator only ever needs to
//! know the routing key to reach either kind of recipient.

use std::collections::HashMap;

use async_trait::async_trait;
use coordinator_protocol::{JobId, Message};
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::Transport;

fn worker_routing_key(worker_id: &str) -> String {
    format!("worker.{worker_id}")
}

fn job_routing_key(requester_id: &str, job_id: JobId) -> String {
    format!("job.{requester_id}.{job_id}")
}

pub struct TopicBrokerTransport {
    exchange: String,
    channel: Channel,
}

impl TopicBrokerTransport {
    pub async fn connect(amqp_url: &str, exchange: impl Into<String>) -> Result<Self, TransportError> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        let exchange = exchange.into();
        channel
            .exchange_declare(
                &exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        Ok(Self { exchange, channel })
    }

    /// Declares the durable, non-auto-delete worker queue
    /// and binds it to this transport's exchange. Called once at worker
    /// registration, not on every message.
    pub async fn ensure_worker_queue(&self, worker_id: &str) -> Result<(), TransportError> {
        let routing_key = worker_routing_key(worker_id);
        self.channel
            .queue_declare(
                &routing_key,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        self.channel
            .queue_bind(&routing_key, &self.exchange, &routing_key, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        Ok(())
    }

    /// Declares the ephemeral, auto-delete job queue. Called once at job
    /// submission.
    pub async fn ensure_job_queue(&self, requester_id: &str, job_id: JobId) -> Result<(), TransportError> {
        let routing_key = job_routing_key(requester_id, job_id);
        self.channel
            .queue_declare(
                &routing_key,
                QueueDeclareOptions {
                    durable: false,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        self.channel
            .queue_bind(&routing_key, &self.exchange, &routing_key, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TopicBrokerTransport {
    async fn setup(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(
        &self,
        message: &Message,
        transport_metadata: &HashMap<String, Value>,
    ) -> Result<bool, TransportError> {
        let routing_key = transport_metadata
            .get("routing_key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match message.job_id {
                Some(job_id) => job_routing_key(&message.recipient_id, job_id),
                None => worker_routing_key(&message.recipient_id),
            });

        // queue_declare/queue_bind are idempotent; re-asserted here so a
        // publish can't race the queue's first declaration.
        match message.job_id {
            Some(job_id) => self.ensure_job_queue(&message.recipient_id, job_id).await?,
            None => self.ensure_worker_queue(&message.recipient_id).await?,
        }

        let body = serde_json::to_vec(message).map_err(|e| TransportError::Metadata(e.to_string()))?;
        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?
            .await
            .map_err(|e| TransportError::Broker(e.to_string()))?;
        Ok(confirm.is_ack())
    }

    fn get_metadata(&self, recipient_id: &str, job_id: Option<JobId>) -> HashMap<String, Value> {
        let routing_key = match job_id {
            Some(job_id) => job_routing_key(recipient_id, job_id),
            None => worker_routing_key(recipient_id),
        };
        HashMap::from([
            ("exchange".to_string(), json!(self.exchange)),
            ("routing_key".to_string(), json!(routing_key)),
        ])
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        Ok(self.channel.status().connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_and_job_routing_keys_are_distinct_namespaces() {
        let job_id = JobId::generate();
        assert_ne!(worker_routing_key("w1"), job_routing_key("alice", job_id));
        assert_eq!(worker_routing_key("w1"), "worker.w1");
        assert_eq!(job_routing_key("alice", job_id), format!("job.alice.{job_id}"));
    }
}
