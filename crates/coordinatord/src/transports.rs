//! Builds the transport fabric from config at startup: every transport
//! named in `transports.enabled` is loaded and connected, and all fallible
//! setup happens here, before the server starts accepting requests.

use std::sync::Arc;

use anyhow::{bail, Context};
use coordinator_protocol::TransportKind;
use coordinator_transport::long_poll::LongPollTransport;
use coordinator_transport::{pub_sub_broker, topic_broker, TransportRegistry};
use tokio::task::JoinHandle;

use crate::config::CoordinatorConfig;

/// Everything startup needs to hand off to the rest of the binary: the
/// registry handlers dispatch through, the concrete long-poll transport
/// (poll handlers need its `notify_for` directly), and the broker event
/// loops running as background tasks so shutdown can abort them.
pub struct TransportFabric {
    pub registry: Arc<TransportRegistry>,
    pub long_poll: Arc<LongPollTransport>,
    pub background_tasks: Vec<JoinHandle<()>>,
}

pub async fn build(config: &CoordinatorConfig) -> anyhow::Result<TransportFabric> {
    let mut registry = TransportRegistry::new();
    let mut background_tasks = Vec::new();
    let long_poll = Arc::new(LongPollTransport::new(&config.transports.long_poll.base_path));

    for name in &config.transports.enabled {
        let kind: TransportKind = name
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("in `transports.enabled`: {name:?}"))?;

        match kind {
            TransportKind::LongPollHttp => {
                registry.register(TransportKind::LongPollHttp, long_poll.clone());
            }
            TransportKind::TopicBroker => {
                let settings = config
                    .transports
                    .topic_broker
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("topic_broker enabled but `transports.topic_broker` is not configured"))?;
                let transport = topic_broker::TopicBrokerTransport::connect(&settings.amqp_url, settings.exchange.clone())
                    .await
                    .context("connecting topic broker transport")?;
                registry.register(TransportKind::TopicBroker, Arc::new(transport));
            }
            TransportKind::PubSubBroker => {
                let settings = config
                    .transports
                    .pub_sub_broker
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("pub_sub_broker enabled but `transports.pub_sub_broker` is not configured"))?;
                let conn = pub_sub_broker::connect_from_url("coordinatord", &settings.mqtt_url, settings.base_topic.clone(), 64)
                    .context("connecting pub/sub broker transport")?;
                let mut event_loop = conn.event_loop;
                background_tasks.push(tokio::spawn(async move {
                    loop {
                        if let Err(e) = event_loop.poll().await {
                            tracing::warn!(error = %e, "pub/sub event loop error, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }));
                registry.register(TransportKind::PubSubBroker, conn.transport);
            }
        }
    }

    if registry.is_empty() {
        bail!("at least one transport must be enabled");
    }

    for kind in registry.enabled_kinds() {
        registry.get(kind)?.setup().await?;
    }

    Ok(TransportFabric {
        registry: Arc::new(registry),
        long_poll,
        background_tasks,
    })
}
