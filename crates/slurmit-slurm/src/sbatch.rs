//! Job submission and cancellation.

use crate::error::SlurmError;
use slurmit_remote::{Session, quote_path, shell_quote};

/// Phrase sbatch prints before the assigned job id.
pub const SUBMIT_SENTINEL: &str = "Submitted batch job";

/// Extract the job id from sbatch stdout.
///
/// A missing sentinel or id is an error: the job may or may not have been
/// queued, and guessing would record a bogus id.
pub fn parse_submission(stdout: &str) -> Result<String, SlurmError> {
    stdout
        .lines()
        .find_map(|line| {
            let (_, rest) = line.split_once(SUBMIT_SENTINEL)?;
            rest.split_whitespace().next()
        })
        .map(str::to_string)
        .ok_or_else(|| SlurmError::Parse {
            command: "sbatch",
            detail: format!("no job id in {:?}", stdout.trim()),
        })
}

/// Submit a batch script, returning the scheduler-assigned job id.
///
/// sbatch runs from the script's directory so relative paths in the
/// script resolve against the run directory.
pub async fn submit<S: Session>(session: &S, script_path: &str) -> Result<String, SlurmError> {
    let (dir, file) = script_path
        .rsplit_once('/')
        .unwrap_or((".", script_path));
    let dir = if dir.is_empty() { "/" } else { dir };
    let cmd = format!("cd {} && sbatch {}", quote_path(dir), shell_quote(file));

    let result = session.run(&cmd, true).await?;
    if !result.ok {
        return Err(SlurmError::Scheduler {
            command: "sbatch".to_string(),
            stderr: result.stderr.trim().to_string(),
        });
    }

    let job_id = parse_submission(&result.stdout)?;
    tracing::info!("Submitted {} as job {}", script_path, job_id);
    Ok(job_id)
}

/// Cancel a job. Returns whether scancel accepted the request.
pub async fn cancel<S: Session>(session: &S, job_id: &str) -> Result<bool, SlurmError> {
    let result = session
        .run(&format!("scancel {}", shell_quote(job_id)), true)
        .await?;
    if !result.ok {
        tracing::warn!("scancel {} failed: {}", job_id, result.stderr.trim());
    }
    Ok(result.ok)
}
