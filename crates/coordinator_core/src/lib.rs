//! The scheduling and reconciliation engine: worker placement and the
//! periodic janitor sweep, both built on the persist-then-dispatch relay
//! helper. This crate has no HTTP surface of its own —
//! `coordinatord` invokes `scheduler::assign` after submit/accept/cancel
//! and owns the `Janitor::run` background task.

pub mod error;
pub mod janitor;
pub mod relay;
pub mod scheduler;

pub use error::CoreError;
pub use janitor::{Janitor, JanitorConfig};
pub use relay::{emit, StoreRecipientLookup};
