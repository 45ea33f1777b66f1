//! Persistence layer: one store per entity, a compile-time engine
//! selection for stale-row predicates, and the pool construction shared
//! by both.

pub mod engine;
pub mod identity_store;
pub mod job_store;
pub mod message_store;
pub mod pool;
pub mod schema;
pub mod worker_store;

pub use engine::{DefaultEngine, StaleRowEngine};
pub use identity_store::IdentityStore;
pub use job_store::JobStore;
pub use message_store::MessageStore;
pub use pool::{create_pool, DatabaseType, DbConfig, DbError, DbPool};
pub use schema::ensure_schema;
pub use worker_store::WorkerStore;
