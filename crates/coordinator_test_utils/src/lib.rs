//! Shared test fixtures (in-memory pool, sample entities), in a
//! dedicated fixture crate other crates' test suites depend on. This
//! crate only needs an in-memory SQLite pool — the coordinator has no
//! other store backend its tests touch.

use coordinator_db::pool::{create_pool, DbConfig, DbPool};
use coordinator_db::schema::ensure_schema;

pub mod fixtures;

/// A fresh in-memory SQLite pool with the schema already applied.
pub async fn memory_pool() -> DbPool {
    let pool = create_pool(DbConfig::sqlite_memory())
        .await
        .expect("in-memory sqlite pool always connects");
    ensure_schema(&pool).await.expect("schema creation on a fresh in-memory db cannot fail");
    pool
}
