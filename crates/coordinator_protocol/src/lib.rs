//! Wire-level domain types shared by every coordinator crate.
//!
//! This crate has no I/O: it defines the entities in the data model, the
//! job state machine's legal transitions, time-ordered ids, and the HTTP
//! DTOs the binary serializes/deserializes. Stores and handlers depend on
//! this crate; it depends on nothing in the workspace.

pub mod defaults;
pub mod error;
pub mod http_types;
pub mod ids;
pub mod identity;
pub mod job;
pub mod message;
pub mod transport;
pub mod worker;

pub use error::ProtocolError;
pub use identity::{Identity, Role};
pub use ids::{JobId, MessageId};
pub use job::{Job, JobStatus};
pub use message::{LogEntry, Message, MessagePayload, MessageType};
pub use transport::{TransportBinding, TransportKind};
pub use worker::{Worker, WorkerStatus};
