//! Directory layout of the slurmit workspace on the execution host.

use chrono::{DateTime, TimeZone};

/// Workspace base used when none is configured.
pub const DEFAULT_BASE: &str = "~/slurmit";

/// `queue/`, `runs/` and `active/` under one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    base: String,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self::new(DEFAULT_BASE)
    }
}

impl WorkspaceLayout {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Replace a leading `~` with `home`.
    ///
    /// `#SBATCH` directives are not shell-expanded, so paths written into
    /// batch scripts must be absolute.
    pub fn with_home(&self, home: &str) -> Self {
        let home = home.trim_end_matches('/');
        match self.base.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Self::new(format!("{home}{rest}")),
            _ => self.clone(),
        }
    }

    pub fn queue_root(&self) -> String {
        format!("{}/queue", self.base)
    }

    pub fn runs_root(&self) -> String {
        format!("{}/runs", self.base)
    }

    pub fn active_root(&self) -> String {
        format!("{}/active", self.base)
    }

    pub fn queue_dir(&self, name: &str) -> String {
        format!("{}/{}", self.queue_root(), name)
    }

    pub fn run_dir(&self, run_id: &str) -> String {
        format!("{}/{}", self.runs_root(), run_id)
    }

    /// Symlink pointing at the job's most recent run directory.
    pub fn active_link(&self, name: &str) -> String {
        format!("{}/{}", self.active_root(), name)
    }
}

/// A job name must be a single, visible path component, since it names
/// the queue directory and the active link.
pub fn is_valid_job_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\0'])
}

/// `<name>_<YYYYmmdd_HHMMSS>`; unique per job at one-second granularity.
pub fn run_id<Tz: TimeZone>(name: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}", name, at.format("%Y%m%d_%H%M%S"))
}

/// Job name part of a run id.
pub fn job_name_of(run_id: &str) -> &str {
    let mut parts = run_id.rsplitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_time), Some(_date), Some(name)) => name,
        _ => run_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_job_name_validation() {
        assert!(is_valid_job_name("train"));
        assert!(is_valid_job_name("my-eval_2.v1"));
        assert!(!is_valid_job_name(""));
        assert!(!is_valid_job_name(".."));
        assert!(!is_valid_job_name(".hidden"));
        assert!(!is_valid_job_name("../../.ssh"));
        assert!(!is_valid_job_name("a/b"));
    }

    #[test]
    fn test_paths() {
        let layout = WorkspaceLayout::new("~/slurmit/");
        assert_eq!(layout.queue_dir("train"), "~/slurmit/queue/train");
        assert_eq!(layout.run_dir("train_20240301_091500"), "~/slurmit/runs/train_20240301_091500");
        assert_eq!(layout.active_link("train"), "~/slurmit/active/train");
    }

    #[test]
    fn test_with_home() {
        let layout = WorkspaceLayout::default().with_home("/home/alice/");
        assert_eq!(layout.base(), "/home/alice/slurmit");
        let absolute = WorkspaceLayout::new("/scratch/slurmit");
        assert_eq!(absolute.with_home("/home/alice"), absolute);
        let other_user = WorkspaceLayout::new("~bob/slurmit");
        assert_eq!(other_user.with_home("/home/alice"), other_user);
    }

    #[test]
    fn test_run_id() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
            .and_utc();
        assert_eq!(run_id("train", &at), "train_20240301_091500");
        assert_eq!(job_name_of("my_job_20240301_091500"), "my_job");
        assert_eq!(job_name_of("odd"), "odd");
    }
}
