//! Message store, backing job-request/status relay and log delivery.
//!
//! Messages are append-only and immutable except for the one-way
//! `sent_at: None -> Some` flip a transport makes once delivery is
//! acknowledged. The log-fetch query orders newest-first under a `LIMIT`
//! and reverses afterward, rather than paying for an `ORDER BY` over the
//! full unbounded history.

use chrono::{DateTime, Utc};
use coordinator_protocol::message::MessageType;
use coordinator_protocol::{JobId, Message, MessageId, MessagePayload};
use sqlx::FromRow;

use crate::pool::DbPool;
use crate::DbError;

#[derive(FromRow)]
struct MessageRow {
    message_id: String,
    sender_id: Option<String>,
    recipient_id: String,
    job_id: Option<String>,
    timestamp: DateTime<Utc>,
    message_type: String,
    payload: String,
    sent_at: Option<DateTime<Utc>>,
}

fn row_to_message(row: MessageRow) -> Result<Message, DbError> {
    use std::str::FromStr;

    let message_id = MessageId::from_str(&row.message_id)
        .map_err(|e| DbError::Corrupt(format!("bad message_id {}: {e}", row.message_id)))?;
    let job_id = row
        .job_id
        .as_deref()
        .map(JobId::from_str)
        .transpose()
        .map_err(|e| DbError::Corrupt(format!("bad job_id on message: {e}")))?;
    let payload: MessagePayload = serde_json::from_str(&row.payload)?;

    Ok(Message {
        message_id,
        sender_id: row.sender_id,
        recipient_id: row.recipient_id,
        job_id,
        timestamp: row.timestamp,
        payload,
        sent_at: row.sent_at,
    })
}

#[derive(Clone)]
pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, message: &Message) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, sender_id, recipient_id, job_id, timestamp,
                message_type, payload, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.message_id.to_string())
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(message.job_id.map(|id| id.to_string()))
        .bind(message.timestamp)
        .bind(message.payload.message_type().as_str())
        .bind(serde_json::to_string(&message.payload)?)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Undelivered backlog for `recipient_id` — long-poll and broker
    /// fan-out both drain through this — oldest-first, bounded by `limit`.
    /// `job_id` narrows the backlog to a single job's long-poll
    /// (`GET /poll/jobs/{id}`).
    pub async fn pending_for_recipient(
        &self,
        recipient_id: &str,
        since: Option<MessageId>,
        job_id: Option<JobId>,
        limit: u32,
    ) -> Result<Vec<Message>, DbError> {
        let rows: Vec<MessageRow> = match (since, job_id) {
            (Some(since), Some(job_id)) => {
                sqlx::query_as(
                    "SELECT * FROM messages WHERE recipient_id = ? AND job_id = ? \
                     AND message_id > ? ORDER BY message_id ASC LIMIT ?",
                )
                .bind(recipient_id)
                .bind(job_id.to_string())
                .bind(since.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(since), None) => {
                sqlx::query_as(
                    "SELECT * FROM messages WHERE recipient_id = ? AND message_id > ? \
                     ORDER BY message_id ASC LIMIT ?",
                )
                .bind(recipient_id)
                .bind(since.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(job_id)) => {
                sqlx::query_as(
                    "SELECT * FROM messages WHERE recipient_id = ? AND job_id = ? \
                     AND sent_at IS NULL ORDER BY message_id ASC LIMIT ?",
                )
                .bind(recipient_id)
                .bind(job_id.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query_as(
                    "SELECT * FROM messages WHERE recipient_id = ? AND sent_at IS NULL \
                     ORDER BY message_id ASC LIMIT ?",
                )
                .bind(recipient_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(row_to_message).collect()
    }

    /// Log fetch for `GET /jobs/{id}/logs`: newest `limit` `job_logs`
    /// messages for `job_id` with `message_id > since`, then reversed to
    /// chronological order before returning, rather than relying on a
    /// window function.
    pub async fn job_logs(
        &self,
        job_id: JobId,
        since: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, DbError> {
        let rows: Vec<MessageRow> = if let Some(since) = since {
            sqlx::query_as(
                "SELECT * FROM messages WHERE job_id = ? AND message_type = 'job_logs' \
                 AND message_id > ? ORDER BY message_id DESC LIMIT ?",
            )
            .bind(job_id.to_string())
            .bind(since.to_string())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM messages WHERE job_id = ? AND message_type = 'job_logs' \
                 ORDER BY message_id DESC LIMIT ?",
            )
            .bind(job_id.to_string())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        };
        let mut messages = rows.into_iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Flips `sent_at` for every id in `message_ids`, idempotently (a
    /// retried delivery ack touches rows already marked sent without
    /// error).
    pub async fn mark_delivered(&self, message_ids: &[MessageId], now: DateTime<Utc>) -> Result<u64, DbError> {
        let mut total = 0u64;
        let mut tx = self.pool.begin().await?;
        for message_id in message_ids {
            let rows_affected = sqlx::query("UPDATE messages SET sent_at = ? WHERE message_id = ? AND sent_at IS NULL")
                .bind(now)
                .bind(message_id.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            total += rows_affected;
        }
        tx.commit().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;
    use coordinator_protocol::message::LogEntry;
    use coordinator_protocol::message::LogStream;

    async fn store() -> MessageStore {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        MessageStore::new(pool)
    }

    fn log_message(job_id: JobId, content: &str) -> Message {
        Message {
            message_id: MessageId::generate(),
            sender_id: Some("worker-1".to_string()),
            recipient_id: "alice".to_string(),
            job_id: Some(job_id),
            timestamp: Utc::now(),
            payload: MessagePayload::JobLogs {
                logs: vec![LogEntry {
                    stream: LogStream::Stdout,
                    content: content.to_string(),
                    timestamp: None,
                }],
            },
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn pending_for_recipient_excludes_delivered() {
        let store = store().await;
        let job_id = JobId::generate();
        let m1 = log_message(job_id, "first");
        store.append(&m1).await.unwrap();
        store.mark_delivered(&[m1.message_id], Utc::now()).await.unwrap();

        let m2 = log_message(job_id, "second");
        store.append(&m2).await.unwrap();

        let pending = store.pending_for_recipient("alice", None, None, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, m2.message_id);
    }

    #[tokio::test]
    async fn job_logs_are_returned_chronologically() {
        let store = store().await;
        let job_id = JobId::generate();
        let m1 = log_message(job_id, "first");
        store.append(&m1).await.unwrap();
        let m2 = log_message(job_id, "second");
        store.append(&m2).await.unwrap();

        let logs = store.job_logs(job_id, None, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message_id, m1.message_id);
        assert_eq!(logs[1].message_id, m2.message_id);
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let store = store().await;
        let job_id = JobId::generate();
        let m1 = log_message(job_id, "first");
        store.append(&m1).await.unwrap();

        let first = store.mark_delivered(&[m1.message_id], Utc::now()).await.unwrap();
        assert_eq!(first, 1);
        let second = store.mark_delivered(&[m1.message_id], Utc::now()).await.unwrap();
        assert_eq!(second, 0);
    }
}
