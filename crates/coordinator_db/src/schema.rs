//! Table definitions for the four stores.
//!
//! JSON-typed columns (`arguments`, `paths`, `capabilities`, `binaries`,
//! `allowed_cidrs`, `*_transport_metadata`) are stored as `TEXT` and
//! serialized/deserialized by the owning store. One `ensure_schema` entry
//! point runs every `CREATE TABLE IF NOT EXISTS` in sequence.

use crate::pool::DbPool;
use crate::DbError;

pub async fn ensure_schema(pool: &DbPool) -> Result<(), DbError> {
    create_identities_table(pool).await?;
    create_workers_table(pool).await?;
    create_jobs_table(pool).await?;
    create_messages_table(pool).await?;
    Ok(())
}

async fn create_identities_table(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            client_id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            hmac_key TEXT NOT NULL,
            key_wrap_id TEXT,
            allowed_cidrs TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_workers_table(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            worker_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            capabilities TEXT NOT NULL,
            binaries TEXT NOT NULL,
            paths TEXT NOT NULL,
            transport TEXT NOT NULL,
            transport_metadata TEXT NOT NULL,
            registration_interval INTEGER NOT NULL,
            version TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_jobs_table(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            requester_id TEXT NOT NULL,
            binary_name TEXT NOT NULL,
            arguments TEXT NOT NULL,
            paths TEXT NOT NULL,
            status TEXT NOT NULL,
            exit_code INTEGER,
            worker_id TEXT,
            created_at TEXT NOT NULL,
            last_update TEXT NOT NULL,
            worker_last_seen TEXT,
            client_last_seen TEXT,
            callback_transport TEXT NOT NULL,
            callback_transport_metadata TEXT NOT NULL,
            heartbeat_interval INTEGER NOT NULL,
            monitor INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_requester ON jobs(requester_id)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_messages_table(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            sender_id TEXT,
            recipient_id TEXT NOT NULL,
            job_id TEXT,
            timestamp TEXT NOT NULL,
            message_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            sent_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, message_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_job ON messages(job_id, message_type, message_id)")
        .execute(pool)
        .await?;
    Ok(())
}
