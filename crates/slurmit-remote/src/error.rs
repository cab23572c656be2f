//! Error taxonomy for remote execution.

use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// Classification of a connection failure.
///
/// Derived from the error text printed by the ssh client. Matching is
/// best-effort: messages differ between OpenSSH versions and locales, and
/// anything unrecognised falls back to [`ConnectionErrorKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    ConnectionRefused,
    AuthFailed,
    Timeout,
    HostNotFound,
    PermissionDenied,
    Other,
}

impl ConnectionErrorKind {
    /// Classify a failure from its error text.
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

        if has(&[
            "could not resolve hostname",
            "name or service not known",
            "nodename nor servname",
            "no address associated with hostname",
            "temporary failure in name resolution",
        ]) {
            Self::HostNotFound
        } else if has(&[
            "permission denied (publickey",
            "permission denied (password",
            "authentication failed",
            "too many authentication failures",
            "no more authentication methods",
            "host key verification failed",
        ]) {
            Self::AuthFailed
        } else if has(&["connection refused"]) {
            Self::ConnectionRefused
        } else if has(&["timed out", "timeout"]) {
            Self::Timeout
        } else if has(&["permission denied"]) {
            Self::PermissionDenied
        } else {
            Self::Other
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Authentication and name resolution failures are terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed | Self::HostNotFound)
    }

    /// Remediation hint shown to the user.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::ConnectionRefused => {
                "Check that the SSH server is running and that the port is correct."
            }
            Self::AuthFailed => {
                "Check your SSH key (--key-file) or install it on the host with ssh-copy-id."
            }
            Self::Timeout => "Check network connectivity, VPN and firewall settings.",
            Self::HostNotFound => "Check the hostname spelling and your DNS configuration.",
            Self::PermissionDenied => {
                "Check file permissions on the remote host and on your SSH key."
            }
            Self::Other => "Try connecting manually with `ssh -v` to see the full error.",
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConnectionRefused => "connection refused",
            Self::AuthFailed => "authentication failed",
            Self::Timeout => "connection timed out",
            Self::HostNotFound => "host not found",
            Self::PermissionDenied => "permission denied",
            Self::Other => "connection error",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum RemoteError {
    #[error("{kind} while connecting to {endpoint} after {attempts} attempt(s): {message}")]
    #[diagnostic(code(slurmit::remote::connection), help("{hint}"))]
    Connection {
        endpoint: String,
        kind: ConnectionErrorKind,
        message: String,
        attempts: u32,
        hint: &'static str,
    },

    #[error("Command failed (exit {exit_code}): {command}\nStderr: {stderr}")]
    #[diagnostic(code(slurmit::remote::command))]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to execute {program}: {source}")]
    #[diagnostic(code(slurmit::remote::spawn))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(code(slurmit::remote::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session to {0} is closed")]
    #[diagnostic(code(slurmit::remote::closed))]
    Closed(String),
}

impl RemoteError {
    /// Build a connection error, attaching the hint for its kind.
    pub fn connection(
        endpoint: impl Into<String>,
        kind: ConnectionErrorKind,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            kind,
            message: message.into(),
            attempts,
            hint: kind.hint(),
        }
    }

    /// The connection failure kind, if this is a connection error.
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Self::Connection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
