//! MQTT-style pub/sub transport, backed by `rumqttc`.
//!
//! Topics: `…/workers/<worker_id>` for worker recipients, `…/jobs/<client_id>/
//! <job_id>` for job recipients, both at QoS 1. Unlike the topic broker,
//! there is no queue declaration step — a subscriber simply subscribes to
//! its own topic; the coordinator only needs to know the topic string to
//! publish to it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use coordinator_protocol::{JobId, Message};
use rumqttc::{AsyncClient, QoS};
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::Transport;

fn worker_topic(base: &str, worker_id: &str) -> String {
    format!("{base}/workers/{worker_id}")
}

fn job_topic(base: &str, client_id: &str, job_id: JobId) -> String {
    format!("{base}/jobs/{client_id}/{job_id}")
}

pub struct PubSubBrokerTransport {
    base_topic: String,
    client: AsyncClient,
}

impl PubSubBrokerTransport {
    pub fn new(base_topic: impl Into<String>, client: AsyncClient) -> Self {
        Self {
            base_topic: base_topic.into(),
            client,
        }
    }
}

#[async_trait]
impl Transport for PubSubBrokerTransport {
    async fn setup(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(
        &self,
        message: &Message,
        transport_metadata: &HashMap<String, Value>,
    ) -> Result<bool, TransportError> {
        let topic = transport_metadata
            .get("topic")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match message.job_id {
                Some(job_id) => job_topic(&self.base_topic, &message.recipient_id, job_id),
                None => worker_topic(&self.base_topic, &message.recipient_id),
            });

        let body = serde_json::to_vec(message).map_err(|e| TransportError::Metadata(e.to_string()))?;
        match self.client.publish(topic, QoS::AtLeastOnce, false, body).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "pub/sub publish failed, message remains persisted");
                Ok(false)
            }
        }
    }

    fn get_metadata(&self, recipient_id: &str, job_id: Option<JobId>) -> HashMap<String, Value> {
        let topic = match job_id {
            Some(job_id) => job_topic(&self.base_topic, recipient_id, job_id),
            None => worker_topic(&self.base_topic, recipient_id),
        };
        HashMap::from([
            ("topic".to_string(), json!(topic)),
            ("qos".to_string(), json!(1)),
        ])
    }

    async fn health_check(&self) -> Result<bool, TransportError> {
        // `rumqttc::AsyncClient` has no synchronous connection probe; the
        // background event loop (owned by the caller, not this struct)
        // is what actually knows connectivity. A client that still accepts
        // publish requests is considered healthy enough for this check —
        // genuine disconnects surface as a `send` returning `false`.
        Ok(true)
    }
}

/// Wraps the client half returned by `rumqttc::AsyncClient::new` together
/// with a handle the caller uses to drive the background `EventLoop` as a
/// long-lived task with its own reconnection loop.
pub struct PubSubConnection {
    pub transport: Arc<PubSubBrokerTransport>,
    pub event_loop: rumqttc::EventLoop,
}

pub fn connect(base_topic: impl Into<String>, options: rumqttc::MqttOptions, capacity: usize) -> PubSubConnection {
    let (client, event_loop) = AsyncClient::new(options, capacity);
    PubSubConnection {
        transport: Arc::new(PubSubBrokerTransport::new(base_topic, client)),
        event_loop,
    }
}

/// Builds the `rumqttc::MqttOptions` from a bare `host:port` URL so callers
/// outside this crate don't need a direct `rumqttc` dependency just to
/// start a connection.
pub fn connect_from_url(
    client_id: &str,
    mqtt_url: &str,
    base_topic: impl Into<String>,
    capacity: usize,
) -> Result<PubSubConnection, TransportError> {
    let (host, port) = parse_host_port(mqtt_url)?;
    let mut options = rumqttc::MqttOptions::new(client_id, host, port);
    options.set_keep_alive(std::time::Duration::from_secs(30));
    Ok(connect(base_topic, options, capacity))
}

fn parse_host_port(url: &str) -> Result<(String, u16), TransportError> {
    let stripped = url
        .trim_start_matches("mqtt://")
        .trim_start_matches("mqtts://");
    let (host, port) = stripped
        .split_once(':')
        .ok_or_else(|| TransportError::Metadata(format!("invalid mqtt url: {url}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| TransportError::Metadata(format!("invalid mqtt port in url: {url}")))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_and_job_topics_are_distinct_namespaces() {
        let job_id = JobId::generate();
        assert_ne!(worker_topic("/t", "w1"), job_topic("/t", "alice", job_id));
        assert_eq!(worker_topic("/t", "w1"), "/t/workers/w1");
        assert_eq!(job_topic("/t", "alice", job_id), format!("/t/jobs/alice/{job_id}"));
    }
}
