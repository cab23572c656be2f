use miette::Diagnostic;
use slurmit_remote::RemoteError;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum SlurmError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error("{command} failed: {stderr}")]
    #[diagnostic(code(slurmit::slurm::command))]
    Scheduler { command: String, stderr: String },

    #[error("Failed to parse {command} output: {detail}")]
    #[diagnostic(
        code(slurmit::slurm::parse),
        help("The scheduler's output format may have changed.")
    )]
    Parse {
        command: &'static str,
        detail: String,
    },
}
