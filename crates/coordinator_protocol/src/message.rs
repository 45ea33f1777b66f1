use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, MessageId};
use crate::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    JobRequest,
    JobStatus,
    JobLogs,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::JobRequest => "job_request",
            MessageType::JobStatus => "job_status",
            MessageType::JobLogs => "job_logs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub stream: LogStream,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// The typed body of a message, tagged by `MessageType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
    JobRequest {
        binary_name: String,
        arguments: Vec<String>,
        paths: Vec<String>,
        heartbeat_interval_secs: u32,
    },
    JobStatus {
        status: JobStatus,
        exit_code: Option<i32>,
    },
    JobLogs {
        logs: Vec<LogEntry>,
    },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessagePayload::JobRequest { .. } => MessageType::JobRequest,
            MessagePayload::JobStatus { .. } => MessageType::JobStatus,
            MessagePayload::JobLogs { .. } => MessageType::JobLogs,
        }
    }
}

/// A persisted, append-only relay event. `sent_at` transitions exactly
/// once, from `None` to `Some`, when a delivery attempt has been
/// acknowledged by its transport — the message store is the sole writer
/// of that field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub sender_id: Option<String>,
    pub recipient_id: String,
    pub job_id: Option<JobId>,
    pub timestamp: DateTime<Utc>,
    pub payload: MessagePayload,
    pub sent_at: Option<DateTime<Utc>>,
}
