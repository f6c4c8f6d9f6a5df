//! Cloud API v4 client.
//!
//! # Architecture
//!
//! - [`CloudClient`] - typed operations on data centers, LANs, servers, NICs and images
//! - [`retry`] - transport-level retry for idempotent requests
//! - [`models`] - wire types and request body builders
//!
//! # Asynchronous mutations
//!
//! Create, update and delete calls are accepted by the API before they are
//! carried out. Each returns an [`Accepted`] holding the [`RequestId`] parsed
//! from the `Location` header; pass it to [`CloudClient::wait_for_completion`]
//! to block until the provisioning request is `DONE` (or has `FAILED`).
//!
//! # Error Handling
//!
//! Every operation returns [`ApiError`]. Error bodies are capped and passed
//! through the configured [`SecretRedactor`] before they land in an error, so
//! credentials echoed back by the server never reach logs.
//!
//! [`RequestId`]: dcprobe_types::RequestId
//! [`SecretRedactor`]: dcprobe_utils::SecretRedactor

mod client;
mod error;
pub mod models;
pub mod retry;

pub use client::{Accepted, CloudClient, parse_request_id};
pub use error::ApiError;

use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 30;

// Note: reqwest only exposes tcp_keepalive (idle time); interval/retries use platform defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

fn base_client_builder(https_only: bool) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(https_only)
        .user_agent(concat!("dcprobe/", env!("CARGO_PKG_VERSION")))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

pub fn http_client_with_timeout(
    timeout: Duration,
    https_only: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    base_client_builder(https_only).timeout(timeout).build()
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
