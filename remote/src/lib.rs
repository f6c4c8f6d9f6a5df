//! Remote command and file-transfer channel.
//!
//! # Architecture
//!
//! - [`RemoteConnector`] - opens a [`RemoteSession`] to an [`SshTarget`];
//!   this is the step the readiness poller retries
//! - [`RemoteSession`] - runs commands and copies files over an open connection
//! - [`OpenSshConnector`] - implementation over the system `ssh`/`scp` binaries
//! - [`RemoteError`] - typed failures; [`RemoteError::failure_class`] tells the
//!   poller which ones are worth retrying
//!
//! All calls block. Every blocking call takes (or was opened with) a
//! [`CancelToken`](dcprobe_core::CancelToken); cancelling it kills any `ssh`
//! child in flight.

mod classify;
mod error;
mod openssh;
mod process;

use std::fmt;
use std::path::{Path, PathBuf};

use dcprobe_core::{AttemptContext, CancelToken};

pub use error::{RemoteError, UnreachableReason};
pub use openssh::{OpenSshConnector, OpenSshSession};

/// Where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key to authenticate with; `None` uses the client's defaults.
    pub identity: Option<PathBuf>,
}

impl SshTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            identity: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: PathBuf) -> Self {
        self.identity = Some(identity);
        self
    }

    /// `user@host`
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` if the command was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub trait RemoteConnector: Send + Sync {
    type Session: RemoteSession;

    /// Establish one connection. Must give up once `ctx.timeout` has passed
    /// or `cancel` fires.
    fn connect(
        &self,
        target: &SshTarget,
        ctx: &AttemptContext,
        cancel: &CancelToken,
    ) -> Result<Self::Session, RemoteError>;
}

pub trait RemoteSession: Send {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    /// Close the connection. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), RemoteError>;

    /// Like [`exec`](Self::exec), but a non-zero exit is an error.
    fn exec_checked(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = self.exec(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
