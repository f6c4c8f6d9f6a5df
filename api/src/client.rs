use std::sync::Arc;
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use dcprobe_config::ApiSettings;
use dcprobe_core::CancelToken;
use dcprobe_types::{
    ComputeSize, DatacenterId, DatacenterSpec, LanId, RequestId, RequestStatus, Secret, ServerId,
};
use dcprobe_utils::SecretRedactor;

use crate::models::{
    Collection, Datacenter, Image, Lan, Nic, RequestStatusBody, Server, build_datacenter_body,
    build_lan_patch, build_server_resize,
};
use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{ApiError, http_client_with_timeout, read_capped_error_body};

/// A mutation the API has accepted but not necessarily carried out yet.
#[derive(Debug, Clone)]
pub struct Accepted<T> {
    pub value: T,
    pub request: RequestId,
}

#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: Secret,
    retry: RetryConfig,
    poll_interval: Duration,
    completion_timeout: Duration,
    redactor: Arc<SecretRedactor>,
}

impl CloudClient {
    pub fn new(settings: &ApiSettings, redactor: Arc<SecretRedactor>) -> Result<Self, ApiError> {
        let http =
            http_client_with_timeout(settings.request_timeout, !settings.allow_insecure_http)
                .map_err(ApiError::Client)?;
        Ok(Self {
            http,
            base: settings.endpoint.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            retry: RetryConfig::default(),
            poll_interval: settings.completion_poll_interval,
            completion_timeout: settings.completion_timeout,
            redactor,
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_completion_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.completion_timeout = timeout;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    // ------------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------------

    pub async fn list_images(&self) -> Result<Vec<Image>, ApiError> {
        let images: Collection<Image> = self.get_json("images", Some(1), "image list").await?;
        Ok(images.items)
    }

    /// HDD images in `location` whose name contains `name` (case-insensitive).
    pub async fn find_images(&self, name: &str, location: &str) -> Result<Vec<Image>, ApiError> {
        let needle = name.to_lowercase();
        let images = self
            .list_images()
            .await?
            .into_iter()
            .filter(|image| {
                image.properties.location == location
                    && image.properties.image_type.as_deref() == Some("HDD")
                    && image.properties.name.to_lowercase().contains(&needle)
            })
            .collect();
        Ok(images)
    }

    // ------------------------------------------------------------------------
    // Data centers and LANs
    // ------------------------------------------------------------------------

    pub async fn create_datacenter(
        &self,
        spec: &DatacenterSpec,
    ) -> Result<Accepted<Datacenter>, ApiError> {
        let body = build_datacenter_body(spec);
        self.mutate(Method::POST, "datacenters", &body, "created datacenter")
            .await
    }

    pub async fn get_datacenter(&self, id: &DatacenterId) -> Result<Datacenter, ApiError> {
        self.get_json(&format!("datacenters/{id}"), None, "datacenter")
            .await
    }

    pub async fn delete_datacenter(&self, id: &DatacenterId) -> Result<RequestId, ApiError> {
        let (request, _) = self
            .send_accepted(Method::DELETE, &format!("datacenters/{id}"), None)
            .await?;
        Ok(request)
    }

    pub async fn update_lan(
        &self,
        datacenter: &DatacenterId,
        lan: LanId,
        name: &str,
        public: bool,
    ) -> Result<Accepted<Lan>, ApiError> {
        let body = build_lan_patch(name, public);
        self.mutate(
            Method::PATCH,
            &format!("datacenters/{datacenter}/lans/{lan}"),
            &body,
            "updated lan",
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Servers and NICs
    // ------------------------------------------------------------------------

    pub async fn list_servers(&self, datacenter: &DatacenterId) -> Result<Vec<Server>, ApiError> {
        let servers: Collection<Server> = self
            .get_json(
                &format!("datacenters/{datacenter}/servers"),
                Some(1),
                "server list",
            )
            .await?;
        Ok(servers.items)
    }

    pub async fn get_server(
        &self,
        datacenter: &DatacenterId,
        server: &ServerId,
    ) -> Result<Server, ApiError> {
        self.get_json(
            &format!("datacenters/{datacenter}/servers/{server}"),
            None,
            "server",
        )
        .await
    }

    pub async fn find_server_by_name(
        &self,
        datacenter: &DatacenterId,
        name: &str,
    ) -> Result<Server, ApiError> {
        self.list_servers(datacenter)
            .await?
            .into_iter()
            .find(|server| server.properties.name == name)
            .ok_or_else(|| ApiError::NotFound {
                kind: "server",
                name: name.to_string(),
            })
    }

    pub async fn update_server(
        &self,
        datacenter: &DatacenterId,
        server: &ServerId,
        size: ComputeSize,
    ) -> Result<Accepted<Server>, ApiError> {
        let body = build_server_resize(size);
        self.mutate(
            Method::PATCH,
            &format!("datacenters/{datacenter}/servers/{server}"),
            &body,
            "updated server",
        )
        .await
    }

    pub async fn list_nics(
        &self,
        datacenter: &DatacenterId,
        server: &ServerId,
    ) -> Result<Vec<Nic>, ApiError> {
        let nics: Collection<Nic> = self
            .get_json(
                &format!("datacenters/{datacenter}/servers/{server}/nics"),
                Some(1),
                "nic list",
            )
            .await?;
        Ok(nics.items)
    }

    pub async fn find_nic_by_name(
        &self,
        datacenter: &DatacenterId,
        server: &ServerId,
        name: &str,
    ) -> Result<Nic, ApiError> {
        self.list_nics(datacenter, server)
            .await?
            .into_iter()
            .find(|nic| nic.properties.name.as_deref() == Some(name))
            .ok_or_else(|| ApiError::NotFound {
                kind: "nic",
                name: name.to_string(),
            })
    }

    // ------------------------------------------------------------------------
    // Request tracking
    // ------------------------------------------------------------------------

    pub async fn request_status(&self, request: &RequestId) -> Result<RequestStatusBody, ApiError> {
        self.get_json(
            &format!("requests/{request}/status"),
            None,
            "request status",
        )
        .await
    }

    /// Poll the request's status until it is `DONE`, `FAILED`, the
    /// completion timeout elapses, or `cancel` fires.
    ///
    /// Cancelling abandons the wait only; the request keeps running on the
    /// server side.
    pub async fn wait_for_completion(
        &self,
        request: &RequestId,
        cancel: &CancelToken,
    ) -> Result<(), ApiError> {
        let started = Instant::now();
        let abandoned = || {
            tracing::warn!(
                request_id = %request,
                elapsed_ms = started.elapsed().as_millis(),
                "Stopped waiting for request"
            );
            ApiError::Cancelled {
                id: request.clone(),
            }
        };
        loop {
            if cancel.is_cancelled() {
                return Err(abandoned());
            }
            let status = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(abandoned()),
                status = self.request_status(request) => status?,
            };
            match status.metadata.status {
                RequestStatus::Done => {
                    tracing::info!(
                        request_id = %request,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Request completed"
                    );
                    return Ok(());
                }
                RequestStatus::Failed => {
                    let message = status
                        .metadata
                        .message
                        .unwrap_or_else(|| "no message".to_string());
                    return Err(ApiError::RequestFailed {
                        id: request.clone(),
                        message: self.redactor.redact(&message).into_owned(),
                    });
                }
                other => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.completion_timeout {
                        return Err(ApiError::CompletionTimeout {
                            id: request.clone(),
                            elapsed_secs: elapsed.as_secs(),
                        });
                    }
                    tracing::debug!(
                        request_id = %request,
                        status = ?other,
                        elapsed_ms = elapsed.as_millis(),
                        "Request still in progress"
                    );
                    let remaining = self.completion_timeout - elapsed;
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(abandoned()),
                        () = tokio::time::sleep(self.poll_interval.min(remaining)) => {}
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    fn url(&self, path: &str, depth: Option<u8>) -> Result<Url, ApiError> {
        let mut url = self.base.join(path)?;
        if let Some(depth) = depth {
            url.query_pairs_mut()
                .append_pair("depth", &depth.to_string());
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        depth: Option<u8>,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path, depth)?;
        tracing::debug!(%method, path, "Sending API request");

        let outcome = send_with_retry(
            || {
                let request = self
                    .http
                    .request(method.clone(), url.clone())
                    .basic_auth(&self.username, Some(self.password.expose()));
                match body {
                    Some(body) => request.json(body),
                    None => request,
                }
            },
            &method,
            &self.retry,
        )
        .await;

        match outcome {
            RetryOutcome::Success(response) => Ok(response),
            RetryOutcome::HttpError(response) => {
                let status = response.status();
                let body = read_capped_error_body(response).await;
                Err(ApiError::Http {
                    method: method.to_string(),
                    path: path.to_string(),
                    status,
                    body: self.redactor.redact(&body).into_owned(),
                })
            }
            RetryOutcome::ConnectionError { attempts, source } => Err(ApiError::Transport {
                method: method.to_string(),
                path: path.to_string(),
                attempts,
                source,
            }),
            RetryOutcome::NonRetryable(source) => Err(ApiError::Transport {
                method: method.to_string(),
                path: path.to_string(),
                attempts: 1,
                source,
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        depth: Option<u8>,
        what: &'static str,
    ) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, depth, None).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode { what, source })
    }

    async fn send_accepted(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(RequestId, Response), ApiError> {
        let response = self.send(method.clone(), path, None, body).await?;
        let request = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_request_id)
            .ok_or_else(|| ApiError::MissingRequestId {
                method: method.to_string(),
                path: path.to_string(),
            })?;
        tracing::debug!(%method, path, request_id = %request, "Request accepted");
        Ok((request, response))
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &Value,
        what: &'static str,
    ) -> Result<Accepted<T>, ApiError> {
        let (request, response) = self.send_accepted(method, path, Some(body)).await?;
        let value = response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode { what, source })?;
        Ok(Accepted { value, request })
    }
}

/// Extract the request id from a `Location` header such as
/// `https://api.example/cloudapi/v4/requests/<id>/status`.
#[must_use]
pub fn parse_request_id(location: &str) -> Option<RequestId> {
    let url = Url::parse(location)
        .or_else(|_| Url::parse("https://placeholder.invalid/").and_then(|base| base.join(location)))
        .ok()?;
    let mut segments = url.path_segments()?;
    segments.by_ref().find(|segment| *segment == "requests")?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(RequestId::new)
}
