//! Mapping from OpenSSH client diagnostics to [`RemoteError`].
//!
//! `ssh` reports every connection-level failure as exit status 255, so the
//! only signal left is the text it writes to stderr. Matching is
//! case-insensitive and first match wins. Local misconfiguration comes
//! first since the client never dialed. Rejection patterns come before
//! reachability ones because a refused key is also followed by
//! "Connection closed".

use std::process::ExitStatus;

use crate::error::{RemoteError, UnreachableReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    ClientMisconfigured,
    AuthenticationRejected,
    HostKeyRejected,
    Unreachable(UnreachableReason),
}

const STDERR_PATTERNS: &[(&str, Verdict)] = &[
    ("bad configuration option", Verdict::ClientMisconfigured),
    ("terminating, ", Verdict::ClientMisconfigured),
    ("illegal option", Verdict::ClientMisconfigured),
    ("unknown option", Verdict::ClientMisconfigured),
    ("usage: ssh", Verdict::ClientMisconfigured),
    ("bad port", Verdict::ClientMisconfigured),
    ("host key verification failed", Verdict::HostKeyRejected),
    ("remote host identification has changed", Verdict::HostKeyRejected),
    ("permission denied", Verdict::AuthenticationRejected),
    ("too many authentication failures", Verdict::AuthenticationRejected),
    ("no supported authentication methods", Verdict::AuthenticationRejected),
    (
        "connection refused",
        Verdict::Unreachable(UnreachableReason::ConnectionRefused),
    ),
    (
        "no route to host",
        Verdict::Unreachable(UnreachableReason::NoRouteToHost),
    ),
    (
        "network is unreachable",
        Verdict::Unreachable(UnreachableReason::NetworkUnreachable),
    ),
    (
        "operation timed out",
        Verdict::Unreachable(UnreachableReason::TimedOut),
    ),
    (
        "connection timed out",
        Verdict::Unreachable(UnreachableReason::TimedOut),
    ),
    (
        "kex_exchange_identification",
        Verdict::Unreachable(UnreachableReason::BannerExchange),
    ),
    (
        "connection reset",
        Verdict::Unreachable(UnreachableReason::ConnectionReset),
    ),
    (
        "connection closed",
        Verdict::Unreachable(UnreachableReason::ConnectionClosed),
    ),
    (
        "could not resolve hostname",
        Verdict::Unreachable(UnreachableReason::NameResolution),
    ),
];

pub(crate) fn classify_stderr(stderr: &str) -> Option<Verdict> {
    let lowered = stderr.to_ascii_lowercase();
    STDERR_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, verdict)| *verdict)
}

/// Build the error for an `ssh` connection attempt that exited before the
/// control socket came up.
pub(crate) fn connect_failure(host: &str, status: ExitStatus, stderr: &str) -> RemoteError {
    let detail = last_line(stderr);
    let verdict = classify_stderr(stderr).unwrap_or_else(|| {
        tracing::debug!(host, ?status, stderr = %detail, "Unrecognized ssh failure");
        Verdict::Unreachable(UnreachableReason::Unrecognized)
    });
    match verdict {
        Verdict::ClientMisconfigured => RemoteError::ClientMisconfigured {
            host: host.to_string(),
            detail,
        },
        Verdict::AuthenticationRejected => RemoteError::AuthenticationRejected {
            host: host.to_string(),
            detail,
        },
        Verdict::HostKeyRejected => RemoteError::HostKeyRejected {
            host: host.to_string(),
            detail,
        },
        Verdict::Unreachable(reason) => RemoteError::Unreachable {
            host: host.to_string(),
            reason,
            detail,
        },
    }
}

/// Last non-empty stderr line; ssh puts the actual diagnostic there.
pub(crate) fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}
