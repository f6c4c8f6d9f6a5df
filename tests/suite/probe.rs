//! Full runs driven from a config file on disk.

use std::sync::Arc;

use wiremock::MockServer;

use dcprobe_api::CloudClient;
use dcprobe_config::ProbeConfig;
use dcprobe_core::CancelToken;
use dcprobe_engine::{Probe, StepName, StepStatus};
use dcprobe_utils::SecretRedactor;

use crate::common::{
    API_PASSWORD, FILE_NAME, FakeConnector, IMAGE_PASSWORD, endpoint, mount_delete,
    mount_passing_cloud, write_config,
};

fn probe(config: ProbeConfig, connector: FakeConnector) -> Probe<FakeConnector> {
    let redactor = Arc::new(SecretRedactor::new(config.secrets()));
    let client = CloudClient::new(&config.api, Arc::clone(&redactor)).unwrap();
    Probe::new(config, client, connector, CancelToken::new(), redactor)
}

#[tokio::test]
async fn config_file_run_writes_json_report() {
    let server = MockServer::start().await;
    mount_passing_cloud(&server).await;
    mount_delete(&server, "dc-1", 1).await;

    let dir = write_config(&endpoint(&server), "");
    let config = ProbeConfig::load(Some(&dir.config_path)).unwrap();
    let report = probe(config, FakeConnector::new(&format!("{FILE_NAME}\n")))
        .run()
        .await;
    assert!(report.passed(), "{report}");

    let report_path = dir.report_path();
    report.write(&report_path).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();

    assert_eq!(written["datacenter_id"], "dc-1");
    let names: Vec<&str> = written["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|step| step["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        [
            "create-datacenter",
            "frontend-running",
            "resize-frontend",
            "file-transfer"
        ]
    );
    assert!(
        written["steps"]
            .as_array()
            .unwrap()
            .iter()
            .all(|step| step["status"] == "passed")
    );
    assert_eq!(written["teardown"]["status"], "passed");

    let text = std::fs::read_to_string(&report_path).unwrap();
    assert!(!text.contains(API_PASSWORD));
    assert!(!text.contains(IMAGE_PASSWORD));
}

#[tokio::test]
async fn missing_file_on_backend_fails_transfer() {
    let server = MockServer::start().await;
    mount_passing_cloud(&server).await;
    mount_delete(&server, "dc-1", 1).await;

    let dir = write_config(&endpoint(&server), "");
    let config = ProbeConfig::load(Some(&dir.config_path)).unwrap();
    let connector = FakeConnector::new("notes.txt\n");
    let commands = Arc::clone(&connector.commands);
    let report = probe(config, connector).run().await;

    assert!(!report.passed());
    let transfer = report.step(StepName::FileTransfer).unwrap();
    assert_eq!(transfer.status, StepStatus::Failed);
    assert!(transfer.detail.contains(FILE_NAME), "{}", transfer.detail);
    assert_eq!(
        report.teardown.as_ref().map(|t| t.status),
        Some(StepStatus::Passed)
    );
    assert!(
        commands
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.starts_with("scp ") && c.contains("10.0.2.5"))
    );
}

#[tokio::test]
async fn keep_datacenter_from_config_file() {
    let server = MockServer::start().await;
    mount_passing_cloud(&server).await;
    mount_delete(&server, "dc-1", 0).await;

    let dir = write_config(&endpoint(&server), "[probe]\nkeep_datacenter = true\n");
    let config = ProbeConfig::load(Some(&dir.config_path)).unwrap();
    assert!(config.probe.keep_datacenter);

    let report = probe(config, FakeConnector::new(FILE_NAME)).run().await;
    assert!(report.passed(), "{report}");
    assert!(report.teardown.is_none());
}
