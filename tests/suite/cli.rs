//! The `dcprobe` binary end to end.

use std::path::Path;
use std::process::Output;

use wiremock::MockServer;

use crate::common::{
    API_PASSWORD, IMAGE_PASSWORD, endpoint, mount_delete, mount_requests_done, write_config,
};

fn dcprobe(home: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_dcprobe"));
    cmd.env("HOME", home)
        .env("RUST_LOG", "warn")
        .env_remove("DCPROBE_USERNAME")
        .env_remove("DCPROBE_PASSWORD")
        .env_remove("DCPROBE_ENDPOINT");
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[tokio::test]
async fn show_config_redacts_secrets() {
    let dir = write_config("http://127.0.0.1:9/cloudapi/v4", "");
    let output = dcprobe(dir.dir.path())
        .arg("--config")
        .arg(&dir.config_path)
        .arg("show-config")
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("probe@example.com"), "{text}");
    assert!(text.contains("<redacted>"), "{text}");
    assert!(!text.contains(API_PASSWORD));
    assert!(!text.contains(IMAGE_PASSWORD));
}

#[tokio::test]
async fn missing_password_is_a_config_error() {
    let dir = write_config("http://127.0.0.1:9/cloudapi/v4", "");
    let content = std::fs::read_to_string(&dir.config_path).unwrap();
    let without_password: String = content
        .lines()
        .filter(|line| !line.starts_with("password ="))
        .map(|line| format!("{line}\n"))
        .collect();
    std::fs::write(&dir.config_path, without_password).unwrap();

    let output = dcprobe(dir.dir.path())
        .arg("--config")
        .arg(&dir.config_path)
        .arg("show-config")
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("api.password"), "{}", stderr(&output));
}

#[tokio::test]
async fn teardown_command_deletes_datacenter() {
    let server = MockServer::start().await;
    mount_delete(&server, "dc-kept", 1).await;
    mount_requests_done(&server).await;
    let dir = write_config(&endpoint(&server), "");

    let output = dcprobe(dir.dir.path())
        .arg("--config")
        .arg(&dir.config_path)
        .args(["teardown", "dc-kept"])
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("datacenter dc-kept deleted"));
}

#[tokio::test]
async fn unknown_subcommand_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = dcprobe(dir.path()).arg("provision").output().await.unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("provision"));
}
