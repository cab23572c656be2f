//! Commands run through the local shell.

use crate::error::RemoteError;
use crate::session::{CommandResult, Session};
use std::process::Stdio;
use tokio::process::Command;

/// Runs commands with `sh -c` on this machine.
///
/// Used when slurmit runs on a cluster login node and talks to a local
/// SLURM installation.
#[derive(Debug, Default, Clone)]
pub struct LocalSession;

impl LocalSession {
    pub fn new() -> Self {
        Self
    }
}

/// Expand a leading `~` using `$HOME`.
fn expand_home(path: &str) -> String {
    let home = std::env::var("HOME").unwrap_or_default();
    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{}", home, rest)
    } else {
        path.to_string()
    }
}

impl Session for LocalSession {
    fn endpoint(&self) -> String {
        "localhost".to_string()
    }

    async fn run(
        &self,
        command: &str,
        tolerate_failure: bool,
    ) -> Result<CommandResult, RemoteError> {
        tracing::debug!("[local] $ {}", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RemoteError::Spawn {
                program: "sh".to_string(),
                source,
            })?;
        CommandResult::from_output(&output).check(command, tolerate_failure)
    }

    async fn ensure_directory(&self, path: &str) -> Result<(), RemoteError> {
        tokio::fs::create_dir_all(expand_home(path))
            .await
            .map_err(|source| RemoteError::Io {
                path: path.to_string(),
                source,
            })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), RemoteError> {
        let path = expand_home(path);
        if let Some(parent) = std::path::Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RemoteError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| RemoteError::Io {
                path: path.clone(),
                source,
            })
    }
}
