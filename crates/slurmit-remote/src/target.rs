//! Remote endpoint description.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// One SSH endpoint. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    host: String,
    user: String,
    port: u16,
    key_file: Option<Utf8PathBuf>,
}

impl ConnectionTarget {
    pub const DEFAULT_PORT: u16 = 22;

    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: Self::DEFAULT_PORT,
            key_file: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_key_file(mut self, key_file: impl Into<Utf8PathBuf>) -> Self {
        self.key_file = Some(key_file.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn key_file(&self) -> Option<&Utf8Path> {
        self.key_file.as_deref()
    }

    /// `user@host`, as passed to ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == Self::DEFAULT_PORT {
            write!(f, "{}@{}", self.user, self.host)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        let target = ConnectionTarget::new("hpc.example.org", "alice");
        assert_eq!(target.to_string(), "alice@hpc.example.org");
        assert_eq!(target.with_port(2222).to_string(), "alice@hpc.example.org:2222");
    }
}
