//! The job lifecycle on the execution host.
//!
//! A job is queued (its configuration uploaded to `queue/<name>`), then
//! submitted: the queue directory is copied to a fresh `runs/<run_id>`,
//! `active/<name>` is repointed at it, the batch script is rendered and
//! handed to sbatch. Only a successful submission is recorded as such.

pub mod config;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod script;
pub mod wait;

pub use config::{JobConfig, SecretConfig, config_hash};
pub use error::RunError;
pub use layout::{DEFAULT_BASE, WorkspaceLayout};
pub use lifecycle::{Provenance, QueuedJob, RunSummary, Runner, Submission};
pub use script::{expand_log_pattern, render_env_script, render_sbatch_script};
pub use wait::{WaitEvent, WaitOptions, wait_for_completion};
