//! Remote command execution for slurmit.
//!
//! A [`Session`] runs shell commands on the host that owns the scheduler.
//! [`SshSession`] multiplexes every command over one OpenSSH control
//! connection; [`LocalSession`] runs them through `sh -c` when slurmit is
//! already on the cluster. [`Executor`] picks one from configuration.

pub mod error;
pub mod executor;
pub mod local;
pub mod retry;
pub mod session;
pub mod shell;
pub mod ssh;
pub mod target;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use error::{ConnectionErrorKind, RemoteError};
pub use executor::Executor;
pub use local::LocalSession;
pub use retry::{RetryPolicy, with_backoff};
pub use session::{CommandResult, Session};
pub use shell::{quote_path, shell_quote};
pub use ssh::SshSession;
pub use target::ConnectionTarget;
