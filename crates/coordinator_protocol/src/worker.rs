use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::TransportBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
    Error,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Error => "error",
        }
    }
}

/// A registered member of the worker fleet.
///
/// `binaries` is expected to already be the intersection of what the
/// worker declared and what the coordinator's configured allow-list
/// permits — the registration handler enforces that before a `Worker`
/// value is constructed, not this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
    pub capabilities: BTreeSet<String>,
    pub binaries: BTreeSet<String>,
    pub paths: BTreeSet<String>,
    pub binding: TransportBinding,
    pub registration_interval_secs: u32,
    pub version: Option<String>,
}

impl Worker {
    /// Whether this worker can run `binary_name` given its declared binary
    /// allow-list and required path set.
    pub fn can_run(&self, binary_name: &str, required_paths: &BTreeSet<String>) -> bool {
        self.binaries.contains(binary_name) && required_paths.is_subset(&self.paths)
    }
}
