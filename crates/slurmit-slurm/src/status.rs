//! Unified job status lookup.

use crate::error::SlurmError;
use crate::sacct::query_history_status;
use crate::squeue::query_live_status;
use crate::types::JobStatus;
use slurmit_remote::Session;

/// Resolve a job's status from the live queue, falling back to history.
///
/// squeue knows nothing of finished jobs and sacct lags the live state, so
/// sacct is only consulted when squeue has no entry. Returns None when
/// neither source knows the job.
pub async fn query_status<S: Session>(
    session: &S,
    job_id: &str,
) -> Result<Option<JobStatus>, SlurmError> {
    if let Some(status) = query_live_status(session, job_id).await? {
        return Ok(Some(status));
    }
    query_history_status(session, job_id).await
}
