use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slurmit_slurm::JobState;
use std::fmt;

/// Lifecycle status persisted with a job record.
///
/// `Queued` and `Submitted` are slurmit's own states; the rest mirror the
/// scheduler. Unrecognised values in old or hand-edited files load as
/// `Unknown`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Queued,
    Submitted,
    Pending,
    Running,
    Completing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    NodeFail,
    Preempted,
    OutOfMemory,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completing => "COMPLETING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::NodeFail => "NODE_FAIL",
            Self::Preempted => "PREEMPTED",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::Timeout
                | Self::NodeFail
                | Self::OutOfMemory
        )
    }

    /// The job has been handed to the scheduler.
    pub fn is_submitted(&self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl From<JobState> for RecordStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending => Self::Pending,
            JobState::Running => Self::Running,
            JobState::Completing => Self::Completing,
            JobState::Completed => Self::Completed,
            JobState::Failed => Self::Failed,
            JobState::Cancelled => Self::Cancelled,
            JobState::Timeout => Self::Timeout,
            JobState::NodeFail => Self::NodeFail,
            JobState::Preempted => Self::Preempted,
            JobState::OutOfMemory => Self::OutOfMemory,
            JobState::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A job known to slurmit.
///
/// Paths are on the execution host, so they are kept as plain strings
/// (they may start with `~`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Job name, unique within the store.
    pub name: String,

    pub status: RecordStatus,

    /// Scheduler-assigned id, once submitted.
    pub slurm_job_id: Option<String>,

    /// `<name>_<YYYYmmdd_HHMMSS>` of the most recent submission.
    pub run_id: Option<String>,

    pub host: Option<String>,
    pub user: Option<String>,

    pub queue_dir: String,
    pub run_dir: Option<String>,
    pub log_dir: Option<String>,

    /// Local config file the job was queued from.
    pub config_file: Option<String>,
    /// `blake3:<16 hex>` digest of the config file.
    pub config_hash: Option<String>,
    pub git_commit: Option<String>,
    pub git_branch: Option<String>,

    /// Command the job executes.
    pub command: String,

    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A freshly queued job.
    pub fn new(
        name: impl Into<String>,
        queue_dir: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: RecordStatus::Queued,
            slurm_job_id: None,
            run_id: None,
            host: None,
            user: None,
            queue_dir: queue_dir.into(),
            run_dir: None,
            log_dir: None,
            config_file: None,
            config_hash: None,
            git_commit: None,
            git_branch: None,
            command: command.into(),
            created_at: Utc::now(),
            submitted_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition. Fields left unset in `update` are kept.
    pub fn apply(&mut self, update: StatusUpdate) {
        self.status = update.status;
        if let Some(id) = update.slurm_job_id {
            self.slurm_job_id = Some(id);
        }
        if let Some(run_id) = update.run_id {
            self.run_id = Some(run_id);
        }
        if let Some(run_dir) = update.run_dir {
            self.run_dir = Some(run_dir);
        }
        if let Some(log_dir) = update.log_dir {
            self.log_dir = Some(log_dir);
        }
        if let Some(at) = update.submitted_at {
            self.submitted_at = Some(at);
        }
        if let Some(at) = update.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = update.completed_at {
            self.completed_at = Some(at);
        }
    }
}

/// Fields changed by a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: RecordStatus,
    pub slurm_job_id: Option<String>,
    pub run_id: Option<String>,
    pub run_dir: Option<String>,
    pub log_dir: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(status: RecordStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}
