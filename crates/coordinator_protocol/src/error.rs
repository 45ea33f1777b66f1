use thiserror::Error;

use crate::job::JobStatus;

/// Errors surfaced by domain types themselves (parsing, invariant checks).
/// Store/transport/security errors live in their own crates; this is only
/// for failures that can occur while constructing or validating a protocol
/// value in isolation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid {kind} id {value:?}: {reason}")]
    InvalidId {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("{from:?} -> {to:?} is not a legal job state transition")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("no mutually supported transport")]
    NoCommonTransport,
}
