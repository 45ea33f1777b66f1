//! Registry of server-side transports, loaded by name at startup from a
//! configured set. At least one must be present.

use std::collections::HashMap;
use std::sync::Arc;

use coordinator_protocol::TransportKind;

use crate::error::TransportError;
use crate::transport::Transport;

#[derive(Default)]
pub struct TransportRegistry {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TransportKind, transport: Arc<dyn Transport>) {
        self.transports.insert(kind, transport);
    }

    pub fn get(&self, kind: TransportKind) -> Result<&Arc<dyn Transport>, TransportError> {
        self.transports
            .get(&kind)
            .ok_or_else(|| TransportError::NotConfigured(kind.to_string()))
    }

    /// The enabled transport kinds, in an unspecified but stable order —
    /// used by transport negotiation to test a caller's preference list
    /// against what this coordinator actually has running.
    pub fn enabled_kinds(&self) -> Vec<TransportKind> {
        self.transports.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::with_capacity(self.transports.len());
        for (kind, transport) in &self.transports {
            let healthy = transport.health_check().await.unwrap_or(false);
            results.insert(kind.to_string(), healthy);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::long_poll::LongPollTransport;

    #[test]
    fn get_fails_for_unregistered_kind() {
        let registry = TransportRegistry::new();
        let err = registry.get(TransportKind::LongPollHttp).unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured(_)));
    }

    #[test]
    fn registered_kind_is_retrievable() {
        let mut registry = TransportRegistry::new();
        registry.register(
            TransportKind::LongPollHttp,
            Arc::new(LongPollTransport::new("/transport/long-poll")),
        );
        assert!(registry.get(TransportKind::LongPollHttp).is_ok());
        assert_eq!(registry.enabled_kinds(), vec![TransportKind::LongPollHttp]);
    }
}
