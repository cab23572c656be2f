use miette::Diagnostic;
use slurmit_logs::LogError;
use slurmit_remote::RemoteError;
use slurmit_slurm::SlurmError;
use slurmit_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum RunError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Slurm(#[from] SlurmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Log(#[from] LogError),

    #[error("Invalid job configuration {path}")]
    #[diagnostic(code(slurmit::run::config))]
    Config {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Job '{name}' is not queued ({queue_dir} does not exist)")]
    #[diagnostic(
        code(slurmit::run::not_queued),
        help("Use `slurmit queue` to see jobs waiting to run.")
    )]
    NotQueued { name: String, queue_dir: String },

    #[error("'{0}' is not a valid job name")]
    #[diagnostic(
        code(slurmit::run::invalid_name),
        help("Job names become directory names: no '/', no leading '.'.")
    )]
    InvalidName(String),

    #[error("Job '{0}' has not been submitted")]
    #[diagnostic(code(slurmit::run::not_submitted))]
    NotSubmitted(String),
}
