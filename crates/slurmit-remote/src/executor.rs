//! Session selection by configuration.

use crate::error::RemoteError;
use crate::local::LocalSession;
use crate::retry::RetryPolicy;
use crate::session::{CommandResult, Session};
use crate::ssh::SshSession;
use crate::target::ConnectionTarget;

/// The session used by the rest of slurmit: SSH when a target is
/// configured, the local shell otherwise.
#[derive(Debug)]
pub enum Executor {
    Ssh(SshSession),
    Local(LocalSession),
}

impl Executor {
    /// Open an executor for `target`, or a local one when there is none.
    pub async fn open(
        target: Option<ConnectionTarget>,
        policy: &RetryPolicy,
    ) -> Result<Self, RemoteError> {
        match target {
            Some(target) => Ok(Self::Ssh(SshSession::connect(target, policy).await?)),
            None => Ok(Self::Local(LocalSession::new())),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Ssh(_))
    }
}

impl Session for Executor {
    fn endpoint(&self) -> String {
        match self {
            Self::Ssh(s) => s.endpoint(),
            Self::Local(s) => s.endpoint(),
        }
    }

    async fn run(
        &self,
        command: &str,
        tolerate_failure: bool,
    ) -> Result<CommandResult, RemoteError> {
        match self {
            Self::Ssh(s) => s.run(command, tolerate_failure).await,
            Self::Local(s) => s.run(command, tolerate_failure).await,
        }
    }

    async fn ensure_directory(&self, path: &str) -> Result<(), RemoteError> {
        match self {
            Self::Ssh(s) => s.ensure_directory(path).await,
            Self::Local(s) => s.ensure_directory(path).await,
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), RemoteError> {
        match self {
            Self::Ssh(s) => s.write_file(path, content).await,
            Self::Local(s) => s.write_file(path, content).await,
        }
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Ssh(s) => s.close().await,
            Self::Local(s) => s.close().await,
        }
    }
}
