use miette::Diagnostic;
use slurmit_remote::RemoteError;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum LogError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error("Job '{0}' has no log directory")]
    #[diagnostic(
        code(slurmit::logs::not_submitted),
        help("Logs exist only after the job has been submitted.")
    )]
    NotSubmitted(String),
}
