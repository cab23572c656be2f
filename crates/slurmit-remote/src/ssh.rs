//! SSH sessions multiplexed over one OpenSSH control connection.

use crate::error::{ConnectionErrorKind, RemoteError};
use crate::retry::{RetryPolicy, with_backoff};
use crate::session::{CommandResult, Session};
use crate::target::ConnectionTarget;
use camino::Utf8PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::process::Command;

/// Exit status the ssh client uses for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Grace period on top of ssh's ConnectTimeout before the attempt is abandoned.
const CONNECT_GRACE: Duration = Duration::from_secs(5);

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A connected SSH session.
///
/// [`SshSession::connect`] starts a background ssh master bound to a
/// private control socket; every [`Session::run`] call reuses it. The
/// master is shut down by [`Session::close`] or, failing that, on drop.
#[derive(Debug)]
pub struct SshSession {
    target: ConnectionTarget,
    control_path: Utf8PathBuf,
    connected: bool,
}

impl SshSession {
    /// Open the control connection, retrying according to `policy`.
    pub async fn connect(
        target: ConnectionTarget,
        policy: &RetryPolicy,
    ) -> Result<Self, RemoteError> {
        let control_path = control_socket_path();
        let endpoint = target.to_string();

        {
            let target = &target;
            let control_path = &control_path;
            with_backoff(policy, &endpoint, move |attempt| {
                tracing::debug!("Opening SSH master to {} (attempt {})", target, attempt);
                open_master(target, control_path, policy.timeout)
            })
            .await?;
        }

        tracing::info!("Connected to {}", endpoint);
        Ok(Self {
            target,
            control_path,
            connected: true,
        })
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-S")
            .arg(self.control_path.as_str())
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"])
            .arg("-p")
            .arg(self.target.port().to_string());
        cmd
    }

    fn exit_args(&self) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.control_path.to_string(),
            "-O".to_string(),
            "exit".to_string(),
            "-p".to_string(),
            self.target.port().to_string(),
            self.target.destination(),
        ]
    }
}

impl Session for SshSession {
    fn endpoint(&self) -> String {
        self.target.to_string()
    }

    async fn run(
        &self,
        command: &str,
        tolerate_failure: bool,
    ) -> Result<CommandResult, RemoteError> {
        if !self.connected {
            return Err(RemoteError::Closed(self.endpoint()));
        }
        tracing::debug!("[{}] $ {}", self.target, command);

        let mut cmd = self.base_command();
        cmd.arg(self.target.destination())
            .arg("--")
            .arg(command)
            .stdin(Stdio::null());

        let output = cmd.output().await.map_err(|source| RemoteError::Spawn {
            program: "ssh".to_string(),
            source,
        })?;
        let result = CommandResult::from_output(&output);
        if let Some(err) = transport_failure(&self.endpoint(), &result) {
            return Err(err);
        }
        result.check(command, tolerate_failure)
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        let status = Command::new("ssh")
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!("Failed to stop SSH master for {}: {}", self.target, e);
        }
        let _ = std::fs::remove_file(error_log_path(&self.control_path));
        tracing::debug!("Closed connection to {}", self.target);
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if !self.connected {
            return;
        }
        // Async close was never awaited (early return or panic); stop the
        // master synchronously so it does not outlive the process.
        let _ = std::process::Command::new("ssh")
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = std::fs::remove_file(error_log_path(&self.control_path));
    }
}

/// The connection error hidden in a command result, if any.
///
/// 255 is also a legal remote exit status, so it only counts as a
/// transport failure when stderr reads like one.
fn transport_failure(endpoint: &str, result: &CommandResult) -> Option<RemoteError> {
    if result.exit_code != SSH_CLIENT_FAILURE {
        return None;
    }
    let kind = ConnectionErrorKind::classify(&result.stderr);
    (kind != ConnectionErrorKind::Other)
        .then(|| RemoteError::connection(endpoint, kind, result.stderr.trim(), 1))
}

/// Start a backgrounded ssh master bound to `control_path`.
///
/// ssh's own diagnostics go to a side file (`-E`) so the backgrounded
/// master does not hold our pipes open; the file is read back on failure.
async fn open_master(
    target: &ConnectionTarget,
    control_path: &Utf8PathBuf,
    timeout: Duration,
) -> Result<(), String> {
    let log_path = error_log_path(control_path);
    let _ = std::fs::remove_file(&log_path);

    let mut cmd = Command::new("ssh");
    cmd.args(["-M", "-f", "-N"])
        .arg("-S")
        .arg(control_path.as_str())
        .arg("-E")
        .arg(log_path.as_str())
        .args(["-o", "ControlPersist=yes", "-o", "BatchMode=yes"])
        .arg("-o")
        .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)))
        .arg("-p")
        .arg(target.port().to_string());
    if let Some(key) = target.key_file() {
        cmd.arg("-i").arg(key.as_str());
    }
    cmd.arg(target.destination())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let status = match tokio::time::timeout(timeout + CONNECT_GRACE, cmd.status()).await {
        Err(_) => return Err(format!("connection timed out after {:?}", timeout)),
        Ok(Err(e)) => return Err(format!("failed to execute ssh: {}", e)),
        Ok(Ok(status)) => status,
    };

    if status.success() {
        return Ok(());
    }
    let message = std::fs::read_to_string(&log_path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if message.is_empty() {
        Err(format!("ssh exited with {}", status))
    } else {
        Err(message)
    }
}

fn control_socket_path() -> Utf8PathBuf {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    dir.join(format!("slurmit-{}-{}.sock", std::process::id(), n))
}

fn error_log_path(control_path: &Utf8PathBuf) -> Utf8PathBuf {
    control_path.with_extension("log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_socket_paths_are_unique() {
        let a = control_socket_path();
        let b = control_socket_path();
        assert_ne!(a, b);
        assert_eq!(error_log_path(&a).extension(), Some("log"));
    }

    #[test]
    fn test_exit_args_target_the_control_socket() {
        let session = SshSession {
            target: ConnectionTarget::new("hpc", "alice").with_port(2222),
            control_path: Utf8PathBuf::from("/tmp/slurmit-1-0.sock"),
            connected: false,
        };
        assert_eq!(
            session.exit_args(),
            vec!["-S", "/tmp/slurmit-1-0.sock", "-O", "exit", "-p", "2222", "alice@hpc"]
        );
    }

    #[test]
    fn test_exit_255_with_transport_stderr_is_a_connection_error() {
        let result = CommandResult::new(
            "",
            "ssh: connect to host hpc port 22: Connection refused\n",
            255,
        );
        let err = transport_failure("alice@hpc:22", &result).unwrap();
        assert_eq!(
            err.connection_kind(),
            Some(ConnectionErrorKind::ConnectionRefused)
        );
        assert!(err.to_string().contains("alice@hpc:22"));
    }

    #[test]
    fn test_exit_255_from_the_remote_command_passes_through() {
        let result = CommandResult::new("partial\n", "my script gave up\n", 255);
        assert!(transport_failure("alice@hpc:22", &result).is_none());
        // It surfaces as an ordinary command failure, or not at all.
        assert!(matches!(
            result.clone().check("./run.sh", false),
            Err(RemoteError::CommandFailed { exit_code: 255, .. })
        ));
        assert_eq!(result.check("./run.sh", true).unwrap().stdout, "partial\n");
    }

    #[test]
    fn test_other_exit_codes_are_never_transport_failures() {
        let result = CommandResult::new("", "Connection refused\n", 1);
        assert!(transport_failure("alice@hpc:22", &result).is_none());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_commands() {
        let mut session = SshSession {
            target: ConnectionTarget::new("hpc", "alice"),
            control_path: control_socket_path(),
            connected: false,
        };
        assert!(matches!(
            session.run("true", false).await,
            Err(RemoteError::Closed(_))
        ));
        // Closing twice is fine.
        session.close().await.unwrap();
        session.close().await.unwrap();
    }
}
