use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The three transports a coordinator must be able to speak. The wire
/// details of each live in `coordinator_transport`; this is only the name
/// used for negotiation and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    LongPollHttp,
    TopicBroker,
    PubSubBroker,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::LongPollHttp => "long_poll_http",
            TransportKind::TopicBroker => "topic_broker",
            TransportKind::PubSubBroker => "pub_sub_broker",
        }
    }

    /// Whether this transport confirms delivery synchronously from `send`.
    /// Long-poll is pull-based — its recipient marks delivery itself when
    /// it drains the backlog; the broker transports are push and confirm
    /// inline.
    pub fn is_push(self) -> bool {
        matches!(self, TransportKind::TopicBroker | TransportKind::PubSubBroker)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long_poll_http" => Ok(TransportKind::LongPollHttp),
            "topic_broker" => Ok(TransportKind::TopicBroker),
            "pub_sub_broker" => Ok(TransportKind::PubSubBroker),
            other => Err(format!("unknown transport name: {other}")),
        }
    }
}

/// The `(transport, transport_metadata)` pair bound to a worker at
/// registration or a job at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportBinding {
    pub transport: TransportKind,
    pub transport_metadata: HashMap<String, serde_json::Value>,
}
