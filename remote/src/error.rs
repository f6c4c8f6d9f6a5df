use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use dcprobe_core::FailureClass;
use thiserror::Error;

/// Why a host could not be reached. All of these are expected to clear up
/// once the server finishes booting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    ConnectionRefused,
    NoRouteToHost,
    NetworkUnreachable,
    TimedOut,
    ConnectionReset,
    ConnectionClosed,
    BannerExchange,
    NameResolution,
    /// `ssh` exited with status 255 and stderr matched nothing we know.
    Unrecognized,
}

impl UnreachableReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection refused",
            Self::NoRouteToHost => "no route to host",
            Self::NetworkUnreachable => "network unreachable",
            Self::TimedOut => "connect timed out",
            Self::ConnectionReset => "connection reset",
            Self::ConnectionClosed => "connection closed",
            Self::BannerExchange => "banner exchange failed",
            Self::NameResolution => "name resolution failed",
            Self::Unrecognized => "unrecognized ssh failure",
        }
    }
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{host} unreachable ({reason}): {detail}")]
    Unreachable {
        host: String,
        reason: UnreachableReason,
        detail: String,
    },
    #[error("connection attempt to {host} exceeded {}s", .timeout.as_secs())]
    AttemptTimedOut { host: String, timeout: Duration },
    #[error("authentication rejected by {host}: {detail}")]
    AuthenticationRejected { host: String, detail: String },
    #[error("host key for {host} rejected: {detail}")]
    HostKeyRejected { host: String, detail: String },
    /// The local `ssh` refused its own arguments or config before dialing.
    #[error("ssh client misconfigured for {host}: {detail}")]
    ClientMisconfigured { host: String, detail: String },
    #[error("`{0}` not found on PATH")]
    BinaryNotFound(&'static str),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("remote command `{command}` {}: {stderr}", describe_exit(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("remote command `{command}` did not finish within {}s", .timeout.as_secs())]
    CommandTimedOut { command: String, timeout: Duration },
    #[error("transfer {from} -> {to} failed: {detail}")]
    TransferFailed {
        from: String,
        to: String,
        detail: String,
    },
    #[error("remote operation cancelled")]
    Cancelled,
    #[error("local file {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RemoteError {
    /// Only reachability problems are worth retrying; anything that got as far
    /// as authentication, or failed locally, will fail the same way again.
    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Unreachable { .. } | Self::AttemptTimedOut { .. } => FailureClass::Transient,
            Self::AuthenticationRejected { .. }
            | Self::HostKeyRejected { .. }
            | Self::ClientMisconfigured { .. }
            | Self::BinaryNotFound(_)
            | Self::Spawn { .. }
            | Self::CommandFailed { .. }
            | Self::CommandTimedOut { .. }
            | Self::TransferFailed { .. }
            | Self::Cancelled
            | Self::LocalFile { .. }
            | Self::Io(_) => FailureClass::Fatal,
        }
    }
}

fn describe_exit(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}
