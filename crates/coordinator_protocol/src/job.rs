use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;
use crate::transport::TransportBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Canceling,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Canceling => "canceling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Whether a job in `self` carries a bound worker: `worker_id` is set
    /// iff status is assigned/running/canceling/terminal-after-assignment.
    /// `Completed`/`Failed` always implied a prior assignment by
    /// construction; only `Canceled` can be reached either with or without
    /// one, so the invariant is enforced at the store layer rather than
    /// purely on the enum.
    pub fn implies_worker_bound(self) -> bool {
        matches!(
            self,
            JobStatus::Assigned | JobStatus::Running | JobStatus::Canceling
        )
    }

    /// Is `self -> next` a legal edge of the job state machine?
    ///
    /// `pending -> assigned -> running -> {completed, failed, canceled}`
    /// `{pending, assigned, running} -> canceling -> canceled`
    /// `pending -> {failed, canceled}`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Assigned) => true,
            (Pending, Failed) => true,
            (Pending, Canceled) => true,
            (Pending, Canceling) => true,
            (Assigned, Running) => true,
            (Assigned, Canceling) => true,
            (Assigned, Pending) => true, // janitor's assignment-timeout reap
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Canceled) => true,
            (Running, Canceling) => true,
            (Canceling, Canceled) => true,
            _ => false,
        }
    }
}

/// A request to run a named binary with arguments and path requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub requester_id: String,
    pub binary_name: String,
    pub arguments: Vec<String>,
    pub paths: BTreeSet<String>,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub worker_last_seen: Option<DateTime<Utc>>,
    pub client_last_seen: Option<DateTime<Utc>>,
    pub binding: TransportBinding,
    pub heartbeat_interval_secs: u32,
    pub monitor: bool,
}

impl Job {
    /// Whether `caller` owns this job for the purposes of `accept`/
    /// `status-update`/heartbeat authorization. A caller that isn't the
    /// bound worker gets a 403, not a 404, so it can tell "wrong worker"
    /// apart from "no such job".
    pub fn owned_by_worker(&self, caller_id: &str) -> bool {
        self.worker_id.as_deref() == Some(caller_id)
    }

    pub fn owned_by_requester(&self, caller_id: &str) -> bool {
        self.requester_id == caller_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges_match_state_machine() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Assigned));
        assert!(JobStatus::Assigned.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Canceling));
        assert!(JobStatus::Canceling.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn illegal_edges_are_rejected() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Canceled.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn terminal_classification() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Canceling.is_terminal());
    }
}
