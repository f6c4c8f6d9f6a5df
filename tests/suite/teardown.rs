//! Deleting a data center left behind by `run --keep`.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dcprobe_api::{ApiError, CloudClient};
use dcprobe_config::ProbeConfig;
use dcprobe_core::CancelToken;
use dcprobe_engine::delete_datacenter;
use dcprobe_types::DatacenterId;
use dcprobe_utils::SecretRedactor;

use crate::common::{endpoint, mount_delete, mount_requests_done, request_location, write_config};

fn client(server: &MockServer) -> (CloudClient, tempfile::TempDir) {
    let dir = write_config(&endpoint(server), "");
    let config = ProbeConfig::load(Some(&dir.config_path)).unwrap();
    let redactor = Arc::new(SecretRedactor::new(config.secrets()));
    (CloudClient::new(&config.api, redactor).unwrap(), dir.dir)
}

#[tokio::test]
async fn teardown_waits_for_the_delete_request() {
    let server = MockServer::start().await;
    mount_delete(&server, "dc-kept", 1).await;
    mount_requests_done(&server).await;
    let (client, _dir) = client(&server);

    delete_datacenter(&client, &DatacenterId::new("dc-kept"), &CancelToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_delete_request_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/cloudapi/v4/datacenters/dc-kept"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("location", request_location(&server, "req-del").as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cloudapi/v4/requests/req-del/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": { "status": "FAILED", "message": "datacenter is locked" }
        })))
        .mount(&server)
        .await;
    let (client, _dir) = client(&server);

    let err = delete_datacenter(&client, &DatacenterId::new("dc-kept"), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::RequestFailed { .. }), "{err:?}");
    assert!(err.to_string().contains("datacenter is locked"), "{err}");
}
