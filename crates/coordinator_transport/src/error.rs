use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport {0:?} is not configured")]
    NotConfigured(String),

    #[error("no transport negotiated for this recipient")]
    NoBinding,

    #[error("broker connection error: {0}")]
    Broker(String),

    #[error("transport metadata malformed: {0}")]
    Metadata(String),
}
