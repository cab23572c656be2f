//! Job log access on the execution host.
//!
//! Log paths are never stored; they are found again on each call by
//! globbing the job's log directory for its scheduler id, so a job that has
//! not started yet simply has no log file.

pub mod error;
pub mod tailer;

pub use error::LogError;
pub use tailer::{
    DEFAULT_POLL_INTERVAL, LogContent, LogPaths, LogStream, LogTail, LogTailer, TailOutcome,
    read_range, remote_file_size, split_complete_utf8,
};
