//! Layered configuration: compiled-in defaults, an optional
//! `coordinator.toml`, then `COORDINATOR_*` environment overrides,
//! built on `figment` rather than a single hand-rolled loader.

use std::collections::BTreeSet;
use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use coordinator_protocol::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollSettings {
    pub base_path: String,
    pub wait_secs: u64,
}

impl Default for LongPollSettings {
    fn default() -> Self {
        Self {
            base_path: "/poll".to_string(),
            wait_secs: DEFAULT_LONG_POLL_WAIT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TopicBrokerSettings {
    pub amqp_url: String,
    pub exchange: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PubSubBrokerSettings {
    pub mqtt_url: String,
    pub base_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportsConfig {
    /// Names from `coordinator_protocol::TransportKind::as_str`, in the
    /// order they should be tried during negotiation.
    pub enabled: Vec<String>,
    pub long_poll: LongPollSettings,
    pub topic_broker: Option<TopicBrokerSettings>,
    pub pub_sub_broker: Option<PubSubBrokerSettings>,
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["long_poll_http".to_string()],
            long_poll: LongPollSettings::default(),
            topic_broker: None,
            pub_sub_broker: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorSettings {
    pub interval_secs: u64,
    pub jitter_secs: u64,
    pub worker_reap_threshold: f64,
    pub job_heartbeat_reap_threshold: f64,
    pub client_heartbeat_reap_threshold: f64,
    pub assignment_timeout_secs: i64,
    pub pending_retry_delay_secs: i64,
    pub pending_timeout_secs: i64,
}

impl Default for JanitorSettings {
    fn default() -> Self {
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

impl From<JanitorSettings> for coordinator_core::JanitorConfig {
    fn from(s: JanitorSettings) -> Self {
        Self {
            interval_secs: s.interval_secs,
            jitter_secs: s.jitter_secs,
            worker_reap_threshold: s.worker_reap_threshold,
            job_heartbeat_reap_threshold: s.job_heartbeat_reap_threshold,
            client_heartbeat_reap_threshold: s.client_heartbeat_reap_threshold,
            assignment_timeout_secs: s.assignment_timeout_secs,
            pending_retry_delay_secs: s.pending_retry_delay_secs,
            pending_timeout_secs: s.pending_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub transports: TransportsConfig,
    pub janitor: JanitorSettings,
    /// CIDRs of reverse proxies trusted to set `X-Forwarded-For`.
    pub trusted_proxies: Vec<String>,
    pub signature_drift_secs: i64,
    pub default_registration_interval_secs: u32,
    pub default_heartbeat_interval_secs: u32,
    /// Binaries a worker is permitted to declare: `binaries` is always the
    /// intersection of declared and allowed. Empty means "no restriction
    /// beyond what workers declare".
    pub binary_allowlist: BTreeSet<String>,
    pub list_default_limit: u32,
    pub recent_window_secs: i64,
    /// Name of the `CipherProvider` used to wrap identity secrets at rest,
    /// and its master key as a hex string. `None` stores secrets as
    /// plaintext hex (a legacy, unwrapped state).
    pub key_wrap_provider: Option<String>,
    pub key_wrap_master_key_hex: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: "sqlite:coordinator.db?mode=rwc".to_string(),
            transports: TransportsConfig::default(),
            janitor: JanitorSettings::default(),
            trusted_proxies: Vec::new(),
            signature_drift_secs: SIGNATURE_DRIFT_SECS,
            default_registration_interval_secs: DEFAULT_REGISTRATION_INTERVAL_SECS,
            default_heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            binary_allowlist: BTreeSet::new(),
            list_default_limit: DEFAULT_LIST_LIMIT,
            recent_window_secs: DEFAULT_RECENT_WINDOW_SECS,
            key_wrap_provider: None,
            key_wrap_master_key_hex: None,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults, then `path` (or `./coordinator.toml` if present), then
    /// `COORDINATOR_*` environment variables — later layers win.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(CoordinatorConfig::default()));
        match path {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => figment = figment.merge(Toml::file("coordinator.toml")),
        }
        figment
            .merge(Env::prefixed("COORDINATOR_").split("__"))
            .extract()
    }

    pub fn trusted_proxy_nets(&self) -> Vec<ipnet::IpNet> {
        self.trusted_proxies
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}
