use std::fmt;
use std::io;
use std::path::PathBuf;

use dcprobe_api::ApiError;
use dcprobe_core::PollError;
use dcprobe_remote::RemoteError;
use thiserror::Error;
use tokio::task::JoinError;

/// An observed value that differs from the expected one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("{subject} {field}: expected {expected}, got {actual}")]
    Mismatch {
        subject: String,
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error("{subject} does not list `{needle}` (got: {haystack})")]
    NotListed {
        subject: String,
        needle: String,
        haystack: String,
    },
}

/// Compare an observed field against its expected value.
pub fn check_eq<T>(
    subject: impl fmt::Display,
    field: &'static str,
    expected: &T,
    actual: &T,
) -> Result<(), CheckError>
where
    T: PartialEq + fmt::Display + ?Sized,
{
    if expected == actual {
        Ok(())
    } else {
        Err(CheckError::Mismatch {
            subject: subject.to_string(),
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Like [`check_eq`] for fields the API may omit; absent renders as `<missing>`.
pub fn check_some_eq<T>(
    subject: impl fmt::Display,
    field: &'static str,
    expected: &T,
    actual: Option<&T>,
) -> Result<(), CheckError>
where
    T: PartialEq + fmt::Display,
{
    match actual {
        Some(actual) => check_eq(subject, field, expected, actual),
        None => Err(CheckError::Mismatch {
            subject: subject.to_string(),
            field,
            expected: expected.to_string(),
            actual: "<missing>".to_string(),
        }),
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("ssh readiness: {0}")]
    SshNotReady(#[from] PollError<RemoteError>),
    #[error("no HDD image matching `{name}` in {location}")]
    NoMatchingImage { name: String, location: String },
    #[error("nic `{nic}` on server `{server}` has no IP address")]
    MissingIp { server: String, nic: String },
    #[error("failed to read ssh key {}: {source}", .path.display())]
    ReadKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ssh key {} is empty", .0.display())]
    EmptyKey(PathBuf),
    #[error("step `{0}` requires an earlier step that did not complete")]
    MissingPrerequisite(&'static str),
    #[error("blocking task failed: {0}")]
    Join(#[from] JoinError),
    #[error("cancelled")]
    Cancelled,
}
