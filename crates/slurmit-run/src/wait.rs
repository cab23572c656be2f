//! Blocking wait for a job to finish.

use slurmit_logs::{read_range, remote_file_size, split_complete_utf8};
use slurmit_remote::Session;
use slurmit_slurm::{JobState, query_status};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Log file to stream while waiting
    pub follow_log: Option<String>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            follow_log: None,
        }
    }
}

/// Progress reported while waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitEvent {
    /// The job moved to a new state.
    State(JobState),
    /// New bytes appeared in the followed log.
    Log(String),
    /// A status query failed; the last known state still stands.
    QueryFailed(String),
}

/// Poll a job until it reaches a terminal state, returning that state.
///
/// Failed or empty status queries leave the last known state in place.
/// Polling runs until the job finishes; callers stop it early by dropping
/// the future.
pub async fn wait_for_completion<S: Session>(
    session: &S,
    job_id: &str,
    options: &WaitOptions,
    mut on_event: impl FnMut(WaitEvent),
) -> JobState {
    let mut last: Option<JobState> = None;
    let mut log_offset = 0u64;

    loop {
        match query_status(session, job_id).await {
            Ok(Some(status)) if status.state != JobState::Unknown => {
                if last != Some(status.state) {
                    last = Some(status.state);
                    on_event(WaitEvent::State(status.state));
                }
            }
            Ok(_) => tracing::debug!("No status for job {} this cycle", job_id),
            Err(e) => {
                tracing::warn!("Status query for job {} failed: {}", job_id, e);
                on_event(WaitEvent::QueryFailed(e.to_string()));
            }
        }

        if let Some(path) = &options.follow_log {
            log_offset = follow_log(session, path, log_offset, &mut on_event).await;
        }

        if let Some(state) = last.filter(JobState::is_terminal) {
            return state;
        }
        sleep(options.poll_interval).await;
    }
}

/// Emit whatever was appended to `path` since `offset`; returns the new offset.
async fn follow_log<S: Session>(
    session: &S,
    path: &str,
    offset: u64,
    on_event: &mut impl FnMut(WaitEvent),
) -> u64 {
    let size = match remote_file_size(session, path).await {
        Ok(Some(size)) => size,
        Ok(None) => return offset,
        Err(e) => {
            tracing::debug!("Cannot stat {}: {}", path, e);
            return offset;
        }
    };
    if size <= offset {
        return size;
    }
    match read_range(session, path, offset, size - offset).await {
        Ok(Some(bytes)) => {
            let (chunk, consumed) = split_complete_utf8(&bytes);
            if !chunk.is_empty() {
                on_event(WaitEvent::Log(chunk));
            }
            offset + consumed as u64
        }
        Ok(None) => offset,
        Err(e) => {
            tracing::debug!("Cannot read {}: {}", path, e);
            offset
        }
    }
}
