//! Live queue queries via squeue.

use crate::error::SlurmError;
use crate::types::{JobListing, JobState, JobStatus};
use slurmit_parsers::{
    data_lines, non_empty_string, parse_duration, parse_slurm_timestamp, split_delimited,
};
use slurmit_remote::{Session, shell_quote};

/// squeue format for a single job's status:
/// %i - Job ID
/// %j - Job name
/// %T - State (extended)
/// %P - Partition
/// %N - Nodelist
/// %M - Elapsed
/// %S - Start time
const STATUS_FORMAT: &str = "%i|%j|%T|%P|%N|%M|%S";
const STATUS_FIELDS: usize = 7;

/// squeue format for queue listings:
/// %i - Job ID
/// %u - User
/// %j - Job name
/// %T - State (extended)
/// %P - Partition
/// %N - Nodelist
/// %b - Requested GRES
/// %M - Elapsed
/// %l - Time limit
const LIST_FORMAT: &str = "%i|%u|%j|%T|%P|%N|%b|%M|%l";
const LIST_FIELDS: usize = 9;

/// Which jobs to include in a queue listing.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user: Option<String>,
    pub partition: Option<String>,
    pub node: Option<String>,
}

impl JobFilter {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::default()
        }
    }

    fn to_args(&self) -> String {
        let mut args = String::new();
        if let Some(user) = &self.user {
            args.push_str(&format!(" -u {}", shell_quote(user)));
        }
        if let Some(partition) = &self.partition {
            args.push_str(&format!(" -p {}", shell_quote(partition)));
        }
        if let Some(node) = &self.node {
            args.push_str(&format!(" -w {}", shell_quote(node)));
        }
        args
    }
}

fn parse_status_line(line: &str) -> Result<JobStatus, String> {
    let fields = split_delimited(line, STATUS_FIELDS)?;
    Ok(JobStatus {
        job_id: fields[0].to_string(),
        name: fields[1].to_string(),
        state: JobState::parse(fields[2]),
        partition: non_empty_string(fields[3]),
        nodes: non_empty_string(fields[4]),
        elapsed: parse_duration(fields[5]),
        start_time: parse_slurm_timestamp(fields[6]),
        end_time: None,
        exit_code: None,
    })
}

/// Parse squeue status output. Malformed lines are dropped.
pub fn parse_squeue_status(output: &str) -> Vec<JobStatus> {
    data_lines(output)
        .filter_map(|line| match parse_status_line(line) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!("Skipping squeue line: {}", e);
                None
            }
        })
        .collect()
}

/// Normalise a GRES request ("gres:gpu:2", "gres/gpu:a100:1") to "gpu:...".
fn requested_gpus(token: &str) -> Option<String> {
    let token = non_empty_string(token)?;
    let token = token
        .strip_prefix("gres:")
        .or_else(|| token.strip_prefix("gres/"))
        .unwrap_or(&token);
    token.starts_with("gpu").then(|| token.to_string())
}

fn parse_listing_line(line: &str) -> Result<JobListing, String> {
    let fields = split_delimited(line, LIST_FIELDS)?;
    Ok(JobListing {
        job_id: fields[0].to_string(),
        user: fields[1].to_string(),
        name: fields[2].to_string(),
        state: JobState::parse(fields[3]),
        partition: non_empty_string(fields[4]),
        nodes: non_empty_string(fields[5]),
        gpus: requested_gpus(fields[6]),
        elapsed: parse_duration(fields[7]),
        time_limit: parse_duration(fields[8]),
    })
}

/// Parse squeue listing output. Malformed lines are dropped.
pub fn parse_squeue_listing(output: &str) -> Vec<JobListing> {
    data_lines(output)
        .filter_map(|line| match parse_listing_line(line) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!("Skipping squeue line: {}", e);
                None
            }
        })
        .collect()
}

/// List jobs in the live queue.
pub async fn list_jobs<S: Session>(
    session: &S,
    filter: &JobFilter,
) -> Result<Vec<JobListing>, SlurmError> {
    let cmd = format!(
        "squeue -h -o {}{}",
        shell_quote(LIST_FORMAT),
        filter.to_args()
    );
    let result = session.run(&cmd, true).await?;
    if !result.ok {
        return Err(SlurmError::Scheduler {
            command: "squeue".to_string(),
            stderr: result.stderr.trim().to_string(),
        });
    }
    Ok(parse_squeue_listing(&result.stdout))
}

/// Look a job up in the live queue.
///
/// Finished jobs drop out of squeue (and squeue exits non-zero for ids it
/// has forgotten), so both cases yield None.
pub async fn query_live_status<S: Session>(
    session: &S,
    job_id: &str,
) -> Result<Option<JobStatus>, SlurmError> {
    let cmd = format!(
        "squeue -j {} -h -o {}",
        shell_quote(job_id),
        shell_quote(STATUS_FORMAT)
    );
    let result = session.run(&cmd, true).await?;
    if !result.ok {
        return Ok(None);
    }
    Ok(parse_squeue_status(&result.stdout)
        .into_iter()
        .find(|status| status.job_id == job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slurmit_remote::fake::FakeSession;
    use std::time::Duration;

    #[test]
    fn test_parse_status_line() {
        let jobs = parse_squeue_status("88421|train|RUNNING|gpu|gpu01|1:02:03|2024-03-01T09:15:00\n");
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.job_id, "88421");
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.partition.as_deref(), Some("gpu"));
        assert_eq!(job.elapsed, Some(Duration::from_secs(3723)));
        assert!(job.start_time.is_some());
        assert!(job.exit_code.is_none());
    }

    #[test]
    fn test_pending_job_has_no_start() {
        let jobs = parse_squeue_status("88422|prep|PENDING|batch||0:00|N/A\n");
        assert_eq!(jobs[0].state, JobState::Pending);
        assert!(jobs[0].nodes.is_none());
        assert!(jobs[0].start_time.is_none());
    }

    #[test]
    fn test_parse_listing_skips_malformed() {
        let output = "\
101|alice|align|RUNNING|batch|node01|N/A|10:00|1:00:00
102|bob|train|PENDING|gpu||gres:gpu:a100:2|0:00|1-00:00:00
103|carol|short
";
        let jobs = parse_squeue_listing(output);
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].gpus.is_none());
        assert_eq!(jobs[1].gpus.as_deref(), Some("gpu:a100:2"));
        assert_eq!(jobs[1].time_limit, Some(Duration::from_secs(86400)));
    }

    #[test]
    fn test_requested_gpus() {
        assert_eq!(requested_gpus("gres/gpu:1").as_deref(), Some("gpu:1"));
        assert_eq!(requested_gpus("gpu:v100:4").as_deref(), Some("gpu:v100:4"));
        assert!(requested_gpus("(null)").is_none());
        assert!(requested_gpus("gres:shard:1").is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_passes_filter() {
        let session = FakeSession::new();
        session.respond("squeue", "101|alice|align|RUNNING|batch|node01|N/A|10:00|1:00:00\n");
        let filter = JobFilter {
            user: Some("alice".to_string()),
            partition: Some("batch".to_string()),
            node: None,
        };
        let jobs = list_jobs(&session, &filter).await.unwrap();
        assert_eq!(jobs.len(), 1);
        let cmd = &session.commands()[0];
        assert!(cmd.ends_with("-u alice -p batch"));
    }

    #[tokio::test]
    async fn test_forgotten_job_is_none() {
        let session = FakeSession::new();
        session.fail("squeue", 1, "slurm_load_jobs error: Invalid job id specified");
        assert!(query_live_status(&session, "5").await.unwrap().is_none());
    }
}
