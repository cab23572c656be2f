//! The capability shared by every command runner.

use crate::error::RemoteError;
use crate::shell::quote_path;
use base64::prelude::*;
use std::process::Output;

/// Result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Standard output, not trimmed. Invalid UTF-8 is replaced.
    pub stdout: String,
    /// Standard output exactly as received; byte-offset reads depend on it.
    pub stdout_bytes: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
    /// `exit_code == 0`.
    pub ok: bool,
}

impl CommandResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        let stdout = stdout.into();
        Self {
            stdout_bytes: stdout.as_bytes().to_vec(),
            stdout,
            stderr: stderr.into(),
            exit_code,
            ok: exit_code == 0,
        }
    }

    /// A result whose stdout need not be valid UTF-8.
    pub fn from_bytes(stdout: Vec<u8>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stdout_bytes: stdout,
            stderr: stderr.into(),
            exit_code,
            ok: exit_code == 0,
        }
    }

    pub(crate) fn from_output(output: &Output) -> Self {
        Self::from_bytes(
            output.stdout.clone(),
            String::from_utf8_lossy(&output.stderr),
            // Killed by a signal: no exit code, report like the shell does.
            output.status.code().unwrap_or(128),
        )
    }

    /// Turn a failed result into an error unless failure is tolerated.
    pub fn check(self, command: &str, tolerate_failure: bool) -> Result<Self, RemoteError> {
        if self.ok || tolerate_failure {
            Ok(self)
        } else {
            Err(RemoteError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Something that can run shell commands on the scheduler host.
///
/// Implementations own at most one underlying connection. A session is not
/// meant to be shared between concurrent operations; open another one
/// instead.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Human-readable endpoint name for messages.
    fn endpoint(&self) -> String;

    /// Run a command through the remote shell.
    ///
    /// With `tolerate_failure` a non-zero exit status is returned as a
    /// [`CommandResult`] with `ok == false`; otherwise it becomes
    /// [`RemoteError::CommandFailed`] carrying the captured stderr.
    async fn run(&self, command: &str, tolerate_failure: bool)
    -> Result<CommandResult, RemoteError>;

    /// Run a command and return its trimmed stdout, failing on non-zero exit.
    async fn run_checked(&self, command: &str) -> Result<String, RemoteError> {
        let result = self.run(command, false).await?;
        Ok(result.stdout.trim().to_string())
    }

    async fn ensure_directory(&self, path: &str) -> Result<(), RemoteError> {
        self.run(&format!("mkdir -p {}", quote_path(path)), false)
            .await
            .map(|_| ())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, RemoteError> {
        self.test_path("-e", path).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, RemoteError> {
        self.test_path("-f", path).await
    }

    async fn directory_exists(&self, path: &str) -> Result<bool, RemoteError> {
        self.test_path("-d", path).await
    }

    async fn test_path(&self, flag: &str, path: &str) -> Result<bool, RemoteError> {
        let result = self
            .run(&format!("test {} {}", flag, quote_path(path)), true)
            .await?;
        Ok(result.ok)
    }

    async fn read_file(&self, path: &str) -> Result<String, RemoteError> {
        let result = self.run(&format!("cat {}", quote_path(path)), false).await?;
        Ok(result.stdout)
    }

    /// Write `content` to `path` byte for byte.
    ///
    /// The content travels base64-encoded, so nothing in it reaches the
    /// remote shell as syntax.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), RemoteError> {
        let command = format!(
            "printf %s {} | base64 -d > {}",
            BASE64_STANDARD.encode(content),
            quote_path(path)
        );
        self.run(&command, false).await.map(|_| ())
    }

    async fn home_directory(&self) -> Result<String, RemoteError> {
        self.run_checked("echo $HOME").await
    }

    /// Release the underlying connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSession;

    #[test]
    fn test_check_tolerates_failure() {
        let result = CommandResult::new("", "boom", 2);
        assert!(!result.ok);
        assert!(result.clone().check("false", true).is_ok());
        let err = result.check("false", false).unwrap_err();
        assert!(matches!(err, RemoteError::CommandFailed { exit_code: 2, .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_default_helpers_build_commands() {
        let session = FakeSession::new();
        session.fail("test -d", 1, "");

        session.ensure_directory("~/slurmit/runs").await.unwrap();
        assert!(!session.directory_exists("/missing").await.unwrap());
        session.write_file("/tmp/a.sh", "echo hi\n").await.unwrap();

        let commands = session.commands();
        assert_eq!(commands[0], "mkdir -p \"$HOME\"/slurmit/runs");
        assert_eq!(commands[1], "test -d /missing");
        assert_eq!(commands[2], "printf %s ZWNobyBoaQo= | base64 -d > /tmp/a.sh");
    }

    /// Runs through `sh` but keeps the trait's default file helpers.
    struct ShellSession(crate::local::LocalSession);

    impl Session for ShellSession {
        fn endpoint(&self) -> String {
            self.0.endpoint()
        }

        async fn run(
            &self,
            command: &str,
            tolerate_failure: bool,
        ) -> Result<CommandResult, RemoteError> {
            self.0.run(command, tolerate_failure).await
        }
    }

    #[tokio::test]
    async fn test_write_file_round_trips_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.yaml");
        let path = path.to_str().unwrap();
        let content = "env_vars:\n  TOKEN: 'a$b`c`'\nSLURMIT_EOF\ntouch pwned\nno newline at end";

        let session = ShellSession(crate::local::LocalSession::new());
        session.write_file(path, content).await.unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), content);
        assert!(!dir.path().join("pwned").exists());
    }

    #[test]
    fn test_from_bytes_keeps_raw_stdout() {
        let result = CommandResult::from_bytes(vec![b'a', 0xC3], "", 0);
        assert_eq!(result.stdout_bytes, vec![b'a', 0xC3]);
        assert_eq!(result.stdout, "a\u{FFFD}");
    }

    #[tokio::test]
    async fn test_path_checks_use_test_flags() {
        let session = FakeSession::new();
        session.fail("test -f", 1, "");

        assert!(session.path_exists("~/slurmit").await.unwrap());
        assert!(!session.file_exists("~/slurmit/queue/a/secret.yaml").await.unwrap());
        assert_eq!(
            session.commands(),
            vec![
                "test -e \"$HOME\"/slurmit".to_string(),
                "test -f \"$HOME\"/slurmit/queue/a/secret.yaml".to_string(),
            ]
        );
    }
}
