//! Worker store.
//!
//! Workers are upserted wholesale on every registration/heartbeat rather
//! than patched field-by-field, since a re-registration legitimately
//! replaces capabilities/binaries/paths.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use coordinator_protocol::worker::WorkerStatus;
use coordinator_protocol::Worker;
use sqlx::FromRow;

use crate::engine::{DefaultEngine, StaleRowEngine};
use crate::pool::DbPool;
use crate::DbError;

#[derive(FromRow)]
struct WorkerRow {
    worker_id: String,
    status: String,
    last_seen: DateTime<Utc>,
    capabilities: String,
    binaries: String,
    paths: String,
    transport: String,
    transport_metadata: String,
    registration_interval: i64,
    version: Option<String>,
}

fn status_from_str(s: &str) -> Result<WorkerStatus, DbError> {
    Ok(match s {
        "online" => WorkerStatus::Online,
        "offline" => WorkerStatus::Offline,
        "error" => WorkerStatus::Error,
        other => return Err(DbError::Corrupt(format!("unknown worker status {other:?}"))),
    })
}

fn row_to_worker(row: WorkerRow) -> Result<Worker, DbError> {
    use coordinator_protocol::transport::TransportBinding;

    let capabilities: BTreeSet<String> = serde_json::from_str(&row.capabilities)?;
    let binaries: BTreeSet<String> = serde_json::from_str(&row.binaries)?;
    let paths: BTreeSet<String> = serde_json::from_str(&row.paths)?;
    let transport = row.transport.parse().map_err(DbError::Corrupt)?;
    let transport_metadata = serde_json::from_str(&row.transport_metadata)?;

    Ok(Worker {
        worker_id: row.worker_id,
        status: status_from_str(&row.status)?,
        last_seen: row.last_seen,
        capabilities,
        binaries,
        paths,
        binding: TransportBinding {
            transport,
            transport_metadata,
        },
        registration_interval_secs: row.registration_interval as u32,
        version: row.version,
    })
}

#[derive(Clone)]
pub struct WorkerStore {
    pool: DbPool,
}

impl WorkerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Registration and re-registration both go through this: registering
    /// again fully replaces the prior declaration.
    pub async fn upsert_worker(&self, worker: &Worker) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO workers (
                worker_id, status, last_seen, capabilities, binaries, paths,
                transport, transport_metadata, registration_interval, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(worker_id) DO UPDATE SET
                status = excluded.status,
                last_seen = excluded.last_seen,
                capabilities = excluded.capabilities,
                binaries = excluded.binaries,
                paths = excluded.paths,
                transport = excluded.transport,
                transport_metadata = excluded.transport_metadata,
                registration_interval = excluded.registration_interval,
                version = excluded.version
            "#,
        )
        .bind(&worker.worker_id)
        .bind(worker.status.as_str())
        .bind(worker.last_seen)
        .bind(serde_json::to_string(&worker.capabilities)?)
        .bind(serde_json::to_string(&worker.binaries)?)
        .bind(serde_json::to_string(&worker.paths)?)
        .bind(worker.binding.transport.to_string())
        .bind(serde_json::to_string(&worker.binding.transport_metadata)?)
        .bind(worker.registration_interval_secs as i64)
        .bind(&worker.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>, DbError> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_worker).transpose()
    }

    pub async fn set_status(&self, worker_id: &str, status: WorkerStatus) -> Result<bool, DbError> {
        let rows_affected = sqlx::query("UPDATE workers SET status = ? WHERE worker_id = ?")
            .bind(status.as_str())
            .bind(worker_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    /// Worker reap: a worker that misses its registration interval goes
    /// `offline` and loses its declared
    /// capabilities/binaries/paths/binding, since none of that is trusted
    /// once the worker has stopped heartbeating — it must re-declare all
    /// of it on its next registration.
    pub async fn mark_offline_and_clear(&self, worker_id: &str) -> Result<bool, DbError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE workers
            SET status = 'offline', capabilities = '[]', binaries = '[]', paths = '[]',
                transport = ?, transport_metadata = '{}', registration_interval = 0
            WHERE worker_id = ?
            "#,
        )
        .bind(coordinator_protocol::transport::TransportKind::LongPollHttp.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn touch_last_seen(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let rows_affected = sqlx::query("UPDATE workers SET last_seen = ? WHERE worker_id = ?")
            .bind(now)
            .bind(worker_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn get_workers_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>, DbError> {
        let rows: Vec<WorkerRow> = sqlx::query_as("SELECT * FROM workers WHERE status = ? ORDER BY worker_id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_worker).collect()
    }

    /// Online workers overdue their registration-interval heartbeat. The
    /// janitor flips these to `offline`.
    pub async fn get_stale_workers(&self, threshold_factor: f64) -> Result<Vec<Worker>, DbError> {
        let sql = format!(
            "SELECT * FROM workers WHERE status = 'online' AND {}",
            DefaultEngine::stale_worker_predicate()
        );
        let rows: Vec<WorkerRow> = sqlx::query_as(&sql).bind(threshold_factor).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_worker).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;
    use coordinator_protocol::transport::{TransportBinding, TransportKind};
    use std::collections::HashMap;

    async fn store() -> WorkerStore {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        WorkerStore::new(pool)
    }

    fn sample(worker_id: &str) -> Worker {
        Worker {
            worker_id: worker_id.to_string(),
            status: WorkerStatus::Online,
            last_seen: Utc::now(),
            capabilities: ["transcode".to_string()].into_iter().collect(),
            binaries: ["ffmpeg".to_string()].into_iter().collect(),
            paths: ["Movies".to_string()].into_iter().collect(),
            binding: TransportBinding {
                transport: TransportKind::LongPollHttp,
                transport_metadata: HashMap::new(),
            },
            registration_interval_secs: 30,
            version: Some("1.0.0".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = store().await;
        store.upsert_worker(&sample("w1")).await.unwrap();
        let fetched = store.get_worker("w1").await.unwrap().unwrap();
        assert!(fetched.binaries.contains("ffmpeg"));
    }

    #[tokio::test]
    async fn re_registration_replaces_declared_capabilities() {
        let store = store().await;
        store.upsert_worker(&sample("w1")).await.unwrap();

        let mut updated = sample("w1");
        updated.binaries = ["handbrake".to_string()].into_iter().collect();
        store.upsert_worker(&updated).await.unwrap();

        let fetched = store.get_worker("w1").await.unwrap().unwrap();
        assert!(!fetched.binaries.contains("ffmpeg"));
        assert!(fetched.binaries.contains("handbrake"));
    }

    #[tokio::test]
    async fn status_filter_excludes_other_statuses() {
        let store = store().await;
        store.upsert_worker(&sample("w1")).await.unwrap();
        let mut offline = sample("w2");
        offline.status = WorkerStatus::Offline;
        store.upsert_worker(&offline).await.unwrap();

        let online = store.get_workers_by_status(WorkerStatus::Online).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].worker_id, "w1");
    }
}
