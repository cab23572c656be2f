//! SLURM job and node types.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// SLURM job state.
///
/// Unrecognised state strings map to [`JobState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
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
    Unknown,
}

impl JobState {
    /// Parse a state from squeue (long or compact form) or sacct.
    ///
    /// sacct decorates some states ("CANCELLED by 12345", "RUNNING+"),
    /// so only the leading word is considered.
    pub fn parse(s: &str) -> Self {
        let base = s
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches('+');

        match base.to_uppercase().as_str() {
            "PENDING" | "PD" => Self::Pending,
            "RUNNING" | "R" => Self::Running,
            "COMPLETING" | "CG" => Self::Completing,
            "COMPLETED" | "CD" => Self::Completed,
            "FAILED" | "F" => Self::Failed,
            "CANCELLED" | "CA" => Self::Cancelled,
            "TIMEOUT" | "TO" => Self::Timeout,
            "NODE_FAIL" | "NF" => Self::NodeFail,
            "PREEMPTED" | "PR" => Self::Preempted,
            "OUT_OF_MEMORY" | "OOM" => Self::OutOfMemory,
            other => {
                tracing::debug!("Unrecognised SLURM state {:?}", other);
                Self::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
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

    /// The job will not change state again.
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
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a single job, from squeue or sacct.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job_id: String,
    pub name: String,
    pub state: JobState,
    pub partition: Option<String>,
    /// Node list in SLURM's compressed form (e.g. "gpu[01-04]")
    pub nodes: Option<String>,
    pub elapsed: Option<Duration>,
    pub start_time: Option<DateTime<Utc>>,
    /// Only known once the job has finished (sacct)
    pub end_time: Option<DateTime<Utc>>,
    /// Only known once the job has finished (sacct)
    pub exit_code: Option<i32>,
}

/// One row of the live queue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobListing {
    pub job_id: String,
    pub user: String,
    pub name: String,
    pub state: JobState,
    pub partition: Option<String>,
    pub nodes: Option<String>,
    /// Requested GPUs as a GRES token (e.g. "gpu:a100:2")
    pub gpus: Option<String>,
    pub elapsed: Option<Duration>,
    pub time_limit: Option<Duration>,
}

/// GPU inventory of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    /// GPU model ("a100"), or "gpu" when the GRES carries no type
    pub gpu_type: String,
    pub total: u32,
    pub used: u32,
}

impl GpuInfo {
    /// Build GPU info, rejecting more GPUs in use than declared.
    pub fn new(gpu_type: impl Into<String>, total: u32, used: u32) -> Option<Self> {
        if used > total {
            return None;
        }
        Some(Self {
            gpu_type: gpu_type.into(),
            total,
            used,
        })
    }

    pub fn free(&self) -> u32 {
        self.total.saturating_sub(self.used)
    }
}

/// One cluster node from sinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    /// sinfo's long state (idle, mixed, allocated, down, drained, ...)
    pub state: String,
    pub partition: String,
    pub cpus_used: u32,
    pub cpus_total: u32,
    /// Human-readable total memory ("256G", "512M")
    pub memory_total: String,
    /// None when the node's GPU inventory is unknown
    pub gpu: Option<GpuInfo>,
}

impl NodeInfo {
    pub fn cpus_free(&self) -> u32 {
        self.cpus_total.saturating_sub(self.cpus_used)
    }

    /// Down, drained or failing nodes accept no work.
    pub fn is_unavailable(&self) -> bool {
        let state = self.state.to_lowercase();
        ["down", "drain", "fail", "maint"]
            .iter()
            .any(|prefix| state.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(JobState::parse("RUNNING"), JobState::Running);
        assert_eq!(JobState::parse("R"), JobState::Running);
        assert_eq!(JobState::parse("PENDING"), JobState::Pending);
        assert_eq!(JobState::parse("PD"), JobState::Pending);
        assert_eq!(JobState::parse("CANCELLED by 12345"), JobState::Cancelled);
        assert_eq!(JobState::parse("node_fail"), JobState::NodeFail);
        assert_eq!(JobState::parse("OUT_OF_MEMORY"), JobState::OutOfMemory);
    }

    #[test]
    fn test_unrecognised_state_is_unknown() {
        assert_eq!(JobState::parse("BOOT_FAIL_NEW"), JobState::Unknown);
        assert_eq!(JobState::parse(""), JobState::Unknown);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::OutOfMemory.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Preempted.is_terminal());
        assert!(!JobState::Unknown.is_terminal());
    }

    #[test]
    fn test_gpu_info_rejects_overuse() {
        assert!(GpuInfo::new("a100", 4, 5).is_none());
        let gpu = GpuInfo::new("a100", 4, 3).unwrap();
        assert_eq!(gpu.free(), 1);
    }

    #[test]
    fn test_node_availability() {
        let mut node = NodeInfo {
            name: "gpu01".to_string(),
            state: "idle".to_string(),
            partition: "gpu".to_string(),
            cpus_used: 4,
            cpus_total: 8,
            memory_total: "31G".to_string(),
            gpu: None,
        };
        assert!(!node.is_unavailable());
        assert_eq!(node.cpus_free(), 4);
        node.state = "drained".to_string();
        assert!(node.is_unavailable());
    }
}
