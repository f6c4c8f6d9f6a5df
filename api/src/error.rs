use reqwest::StatusCode;
use thiserror::Error;

use dcprobe_types::RequestId;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API error {status} on {method} {path}: {body}")]
    Http {
        method: String,
        path: String,
        status: StatusCode,
        /// Capped and redacted.
        body: String,
    },
    #[error("transport error on {method} {path} after {attempts} attempt(s): {source}")]
    Transport {
        method: String,
        path: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("response to {method} {path} carried no request id")]
    MissingRequestId { method: String, path: String },
    #[error("request {id} failed: {message}")]
    RequestFailed { id: RequestId, message: String },
    #[error("request {id} not finished after {elapsed_secs}s")]
    CompletionTimeout { id: RequestId, elapsed_secs: u64 },
    #[error("stopped waiting for request {id}: cancelled")]
    Cancelled { id: RequestId },
    #[error("no {kind} named `{name}`")]
    NotFound { kind: &'static str, name: String },
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || self.status() == Some(StatusCode::NOT_FOUND)
    }
}
