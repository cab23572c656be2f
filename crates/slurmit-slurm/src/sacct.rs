//! Job history via sacct.

use crate::error::SlurmError;
use crate::types::{JobState, JobStatus};
use slurmit_parsers::{
    data_lines, non_empty_string, parse_duration, parse_exit_code, parse_slurm_timestamp,
    split_delimited,
};
use slurmit_remote::{Session, shell_quote};

/// sacct output format (--parsable2 uses | delimiter)
const SACCT_FORMAT: &str = "JobID,JobName,State,Partition,NodeList,Elapsed,Start,End,ExitCode";
const SACCT_FIELDS: usize = 9;

/// Parse the allocation line of sacct output.
///
/// Only the first line describes the job itself; any following lines are
/// job steps (`.batch`, `.extern`) and are ignored.
pub fn parse_sacct_status(output: &str) -> Option<JobStatus> {
    let line = data_lines(output).next()?;
    let fields = match split_delimited(line, SACCT_FIELDS) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!("Skipping sacct line: {}", e);
            return None;
        }
    };

    Some(JobStatus {
        job_id: fields[0].to_string(),
        name: fields[1].to_string(),
        state: JobState::parse(fields[2]),
        partition: non_empty_string(fields[3]),
        nodes: non_empty_string(fields[4]),
        elapsed: parse_duration(fields[5]),
        start_time: parse_slurm_timestamp(fields[6]),
        end_time: parse_slurm_timestamp(fields[7]),
        exit_code: parse_exit_code(fields[8]),
    })
}

/// Look a job up in accounting history.
///
/// Accounting may be disabled or lagging; a failing sacct yields None.
pub async fn query_history_status<S: Session>(
    session: &S,
    job_id: &str,
) -> Result<Option<JobStatus>, SlurmError> {
    let cmd = format!(
        "sacct -j {} --format={} --parsable2 -n -X",
        shell_quote(job_id),
        SACCT_FORMAT
    );
    let result = session.run(&cmd, true).await?;
    if !result.ok {
        tracing::debug!("sacct failed for {}: {}", job_id, result.stderr.trim());
        return Ok(None);
    }
    Ok(parse_sacct_status(&result.stdout))
}
