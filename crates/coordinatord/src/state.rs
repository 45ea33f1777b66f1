//! Explicit dependency bag passed into every handler: constructor-style
//! dependencies rather than a shared-mutable app-state global.

use std::sync::Arc;

use coordinator_db::{IdentityStore, JobStore, MessageStore, WorkerStore};
use coordinator_security::CipherRegistry;
use coordinator_transport::long_poll::LongPollTransport;
use coordinator_transport::TransportRegistry;

use crate::config::CoordinatorConfig;

#[derive(Clone)]
pub struct AppState {
    pub job_store: JobStore,
    pub worker_store: WorkerStore,
    pub message_store: MessageStore,
    pub identity_store: IdentityStore,
    pub cipher_registry: Arc<CipherRegistry>,
    pub transport_registry: Arc<TransportRegistry>,
    /// Also registered into `transport_registry` under
    /// `TransportKind::LongPollHttp` for ordinary dispatch; held here too
    /// because poll handlers need its concrete `notify_for` before they
    /// start waiting, which the `Transport` trait object doesn't expose.
    pub long_poll: Arc<LongPollTransport>,
    pub config: Arc<CoordinatorConfig>,
    pub trusted_proxies: Arc<Vec<ipnet::IpNet>>,
}
