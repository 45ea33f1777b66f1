//! Job store: the only authority over job status transitions.
//!
//! Status changes go through a begin-transaction / conditional-`UPDATE` /
//! check-rows-affected CAS idiom rather than a plain `UPDATE`. Queries
//! here are written for the `sqlite` dialect (this crate's default
//! feature); a `postgres`-feature build would need the equivalent queries
//! rewritten with `$n` placeholders — the dialect-sensitive pieces are
//! isolated behind `engine::StaleRowEngine`, which already has a
//! `PostgresEngine` implementation, but the surrounding query skeletons in
//! this file are sqlite-only for now (documented scope limitation).

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use coordinator_protocol::{Job, JobId, JobStatus};
use sqlx::{FromRow, Row};

use crate::engine::{DefaultEngine, StaleRowEngine};
use crate::pool::DbPool;
use crate::DbError;

#[derive(FromRow)]
struct JobRow {
    job_id: String,
    requester_id: String,
    binary_name: String,
    arguments: String,
    paths: String,
    status: String,
    exit_code: Option<i64>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    last_update: DateTime<Utc>,
    worker_last_seen: Option<DateTime<Utc>>,
    client_last_seen: Option<DateTime<Utc>>,
    callback_transport: String,
    callback_transport_metadata: String,
    heartbeat_interval: i64,
    monitor: i64,
}

fn status_to_str(status: JobStatus) -> &'static str {
    status.as_str()
}

fn status_from_str(s: &str) -> Result<JobStatus, DbError> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "assigned" => JobStatus::Assigned,
        "running" => JobStatus::Running,
        "canceling" => JobStatus::Canceling,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "canceled" => JobStatus::Canceled,
        other => return Err(DbError::Corrupt(format!("unknown job status {other:?}"))),
    })
}

fn row_to_job(row: JobRow) -> Result<Job, DbError> {
    use coordinator_protocol::transport::TransportBinding;
    use std::str::FromStr;

    let job_id = JobId::from_str(&row.job_id)
        .map_err(|e| DbError::Corrupt(format!("bad job_id {}: {e}", row.job_id)))?;
    let arguments: Vec<String> = serde_json::from_str(&row.arguments)?;
    let paths: BTreeSet<String> = serde_json::from_str(&row.paths)?;
    let transport = row.callback_transport.parse().map_err(DbError::Corrupt)?;
    let transport_metadata = serde_json::from_str(&row.callback_transport_metadata)?;

    Ok(Job {
        job_id,
        requester_id: row.requester_id,
        binary_name: row.binary_name,
        arguments,
        paths,
        status: status_from_str(&row.status)?,
        exit_code: row.exit_code.map(|c| c as i32),
        worker_id: row.worker_id,
        created_at: row.created_at,
        last_update: row.last_update,
        worker_last_seen: row.worker_last_seen,
        client_last_seen: row.client_last_seen,
        binding: TransportBinding {
            transport,
            transport_metadata,
        },
        heartbeat_interval_secs: row.heartbeat_interval as u32,
        monitor: row.monitor != 0,
    })
}

#[derive(Clone)]
pub struct JobStore {
    pool: DbPool,
}

impl JobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_job(&self, job: &Job) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, requester_id, binary_name, arguments, paths, status,
                exit_code, worker_id, created_at, last_update, worker_last_seen,
                client_last_seen, callback_transport, callback_transport_metadata,
                heartbeat_interval, monitor
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.job_id.to_string())
        .bind(&job.requester_id)
        .bind(&job.binary_name)
        .bind(serde_json::to_string(&job.arguments)?)
        .bind(serde_json::to_string(&job.paths)?)
        .bind(status_to_str(job.status))
        .bind(job.exit_code)
        .bind(&job.worker_id)
        .bind(job.created_at)
        .bind(job.last_update)
        .bind(job.worker_last_seen)
        .bind(job.client_last_seen)
        .bind(job.binding.transport.to_string())
        .bind(serde_json::to_string(&job.binding.transport_metadata)?)
        .bind(job.heartbeat_interval_secs as i64)
        .bind(job.monitor as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// A trivial round-trip used by `GET /health?deep=true` to confirm the
    /// pool can still reach the database.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, DbError> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    /// CAS status update. `previous_status` of `None` means "unconditional"
    /// — used only by the abandoned-monitored reap, which moves any active
    /// state to `canceling` without gating on a specific prior status.
    pub async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        exit_code: Option<i32>,
        worker_id: Option<&str>,
        previous_status: Option<JobStatus>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        let rows_affected = if let Some(prev) = previous_status {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = ?, last_update = ?,
                    exit_code = COALESCE(?, exit_code),
                    worker_id = COALESCE(?, worker_id),
                    worker_last_seen = CASE WHEN ? IS NOT NULL THEN ? ELSE worker_last_seen END
                WHERE job_id = ? AND status = ?
                "#,
            )
            .bind(status_to_str(status))
            .bind(now)
            .bind(exit_code)
            .bind(worker_id)
            .bind(worker_id)
            .bind(now)
            .bind(job_id.to_string())
            .bind(status_to_str(prev))
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = ?, last_update = ?,
                    exit_code = COALESCE(?, exit_code),
                    worker_id = COALESCE(?, worker_id),
                    worker_last_seen = CASE WHEN ? IS NOT NULL THEN ? ELSE worker_last_seen END
                WHERE job_id = ?
                "#,
            )
            .bind(status_to_str(status))
            .bind(now)
            .bind(exit_code)
            .bind(worker_id)
            .bind(worker_id)
            .bind(now)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        tx.commit().await?;
        Ok(rows_affected > 0)
    }

    pub async fn update_worker_heartbeat(&self, job_id: JobId, now: DateTime<Utc>) -> Result<bool, DbError> {
        let rows_affected = sqlx::query("UPDATE jobs SET worker_last_seen = ? WHERE job_id = ?")
            .bind(now)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn update_client_heartbeat(
        &self,
        job_id: JobId,
        monitor: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows_affected = sqlx::query(
            "UPDATE jobs SET client_last_seen = ?, monitor = COALESCE(?, monitor) WHERE job_id = ?",
        )
        .bind(now)
        .bind(monitor.map(|m| m as i64))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn get_stale_running_jobs(&self, threshold_factor: f64) -> Result<Vec<Job>, DbError> {
        let sql = format!(
            "SELECT * FROM jobs WHERE status = 'running' AND {}",
            DefaultEngine::stale_running_predicate()
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql).bind(threshold_factor).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn get_stale_assigned_jobs(&self, timeout_seconds: i64) -> Result<Vec<Job>, DbError> {
        let sql = format!(
            "SELECT * FROM jobs WHERE status = 'assigned' AND {}",
            DefaultEngine::stale_assigned_predicate()
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql).bind(timeout_seconds).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_job).collect()
    }

    /// `min_seconds` alone selects the retry band's lower bound; pass
    /// `max_seconds` to additionally bound the upper edge (the retry
    /// window is `[retry_delay, pending_timeout)`; the fail sweep omits
    /// `max_seconds` to select everything `>= pending_timeout`).
    pub async fn get_stale_pending_jobs(
        &self,
        min_seconds: i64,
        max_seconds: Option<i64>,
    ) -> Result<Vec<Job>, DbError> {
        let rows: Vec<JobRow> = if let Some(max_seconds) = max_seconds {
            let sql = format!(
                "SELECT * FROM jobs WHERE status = 'pending' AND {} AND {}",
                DefaultEngine::stale_pending_min_predicate(),
                DefaultEngine::stale_pending_max_predicate()
            );
            sqlx::query_as(&sql)
                .bind(min_seconds)
                .bind(max_seconds)
                .fetch_all(&self.pool)
                .await?
        } else {
            let sql = format!(
                "SELECT * FROM jobs WHERE status = 'pending' AND {}",
                DefaultEngine::stale_pending_min_predicate()
            );
            sqlx::query_as(&sql).bind(min_seconds).fetch_all(&self.pool).await?
        };
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn get_stale_monitored_jobs(&self, threshold_factor: f64) -> Result<Vec<Job>, DbError> {
        let sql = format!(
            "SELECT * FROM jobs WHERE monitor = 1 AND status IN ('pending','assigned','running','canceling') AND {}",
            DefaultEngine::stale_monitored_predicate()
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql).bind(threshold_factor).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn get_worker_load(&self) -> Result<HashMap<String, i64>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT worker_id, COUNT(*) as load
            FROM jobs
            WHERE status IN ('assigned', 'running', 'canceling') AND worker_id IS NOT NULL
            GROUP BY worker_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut load = HashMap::with_capacity(rows.len());
        for row in rows {
            let worker_id: String = row.try_get("worker_id")?;
            let count: i64 = row.try_get("load")?;
            load.insert(worker_id, count);
        }
        Ok(load)
    }

    /// `GET /jobs` with a recency-window convenience: terminal jobs older
    /// than `recent_window_seconds` are hidden from an unfiltered listing;
    /// active jobs always show.
    pub async fn list_jobs(
        &self,
        requester_id: Option<&str>,
        limit: u32,
        since_id: Option<JobId>,
        recent_window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, DbError> {
        let cutoff = now - chrono::Duration::seconds(recent_window_seconds);
        let mut sql = String::from(
            "SELECT * FROM jobs WHERE (status IN ('pending','assigned','running','canceling') \
             OR (status IN ('completed','failed','canceled') AND last_update > ?))",
        );
        if requester_id.is_some() {
            sql.push_str(" AND requester_id = ?");
        }
        if since_id.is_some() {
            sql.push_str(" AND job_id < ?");
        }
        sql.push_str(" ORDER BY job_id DESC LIMIT ?");

        let mut query = sqlx::query_as(&sql).bind(cutoff);
        if let Some(requester_id) = requester_id {
            query = query.bind(requester_id);
        }
        if let Some(since_id) = since_id {
            query = query.bind(since_id.to_string());
        }
        query = query.bind(limit as i64);

        let rows: Vec<JobRow> = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;
    use coordinator_protocol::transport::{TransportBinding, TransportKind};
    use std::collections::HashMap as StdHashMap;

    async fn store() -> JobStore {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        JobStore::new(pool)
    }

    fn sample_job() -> Job {
        let now = Utc::now();
        Job {
            job_id: JobId::generate(),
            requester_id: "alice".to_string(),
            binary_name: "ffmpeg".to_string(),
            arguments: vec!["-i".to_string(), "in.mp4".to_string()],
            paths: ["Movies".to_string()].into_iter().collect(),
            status: JobStatus::Pending,
            exit_code: None,
            worker_id: None,
            created_at: now,
            last_update: now,
            worker_last_seen: None,
            client_last_seen: None,
            binding: TransportBinding {
                transport: TransportKind::LongPollHttp,
                transport_metadata: StdHashMap::new(),
            },
            heartbeat_interval_secs: 30,
            monitor: false,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();
        let fetched = store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.binary_name, "ffmpeg");
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cas_update_fails_on_wrong_prior_status() {
        let store = store().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();

        let ok = store
            .update_status(job.job_id, JobStatus::Running, None, None, Some(JobStatus::Assigned), Utc::now())
            .await
            .unwrap();
        assert!(!ok);

        let fetched = store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cas_update_succeeds_on_matching_prior_status() {
        let store = store().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();

        let ok = store
            .update_status(
                job.job_id,
                JobStatus::Assigned,
                None,
                Some("worker-1"),
                Some(JobStatus::Pending),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(ok);

        let fetched = store.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Assigned);
        assert_eq!(fetched.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn repeated_terminal_update_is_idempotent_no_op_on_rowcount() {
        let store = store().await;
        let job = sample_job();
        store.create_job(&job).await.unwrap();
        store
            .update_status(job.job_id, JobStatus::Completed, Some(0), None, None, Utc::now())
            .await
            .unwrap();

        // second call with a prior-status guard of Completed finds no row
        // to move away from Completed, which is the intended idempotent
        // no-op shape.
        let ok = store
            .update_status(
                job.job_id,
                JobStatus::Completed,
                Some(0),
                None,
                Some(JobStatus::Running),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!ok);
    }
}
