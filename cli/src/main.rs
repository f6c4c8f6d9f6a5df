//! dcprobe CLI - binary entry point.
//!
//! # Commands
//!
//! - `run` - the full probe: provision, verify, resize, transfer, tear down
//! - `wait-ssh <host>` - block until a host accepts SSH, as the probe does
//! - `teardown <datacenter-id>` - delete a data center kept by `run --keep`
//! - `show-config` - print the effective configuration, secrets redacted
//!
//! Logs go to stderr and to `~/.dcprobe/logs/dcprobe.log`. `RUST_LOG`
//! overrides the default `info` filter. Ctrl-C cancels the run; the data
//! center is still torn down. A second Ctrl-C stops waiting for the teardown.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{self, ExitCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dcprobe_api::CloudClient;
use dcprobe_config::ProbeConfig;
use dcprobe_core::CancelToken;
use dcprobe_engine::{Probe, delete_datacenter, ssh_poller, wait_for_ssh};
use dcprobe_remote::{OpenSshConnector, RemoteSession, SshTarget};
use dcprobe_types::DatacenterId;
use dcprobe_utils::SecretRedactor;

/// 128 + SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "dcprobe", about = "End-to-end probe of the Cloud API", version)]
struct Cli {
    /// Config file. Defaults to `~/.dcprobe/config.toml`.
    #[arg(long, global = true, value_name = "path")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full probe scenario.
    Run {
        /// Leave the data center in place afterwards.
        #[arg(long)]
        keep: bool,
        /// Write the JSON run report here.
        #[arg(long, value_name = "path")]
        report: Option<PathBuf>,
    },
    /// Wait until a host accepts SSH connections.
    WaitSsh {
        host: String,
        /// Total wait in seconds; overrides `ssh.ready_timeout_secs`.
        #[arg(long, value_name = "secs")]
        timeout: Option<u64>,
    },
    /// Delete a data center and wait for the deletion to finish.
    Teardown { datacenter_id: String },
    /// Print the effective configuration with secrets redacted.
    ShowConfig,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();
    let (log_path, file_layer) = match log_file {
        Some((path, file)) => (
            Some(path),
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(file_layer)
        .init();

    if let Some(path) = log_path {
        tracing::debug!(path = %path.display(), "Logging initialized");
    }
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.dcprobe/logs/dcprobe.log
    if let Some(config_path) = ProbeConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("dcprobe.log"));
    }

    // Fallback: ./.dcprobe/logs/dcprobe.log
    candidates.push(PathBuf::from(".dcprobe").join("logs").join("dcprobe.log"));

    candidates
}

/// First Ctrl-C cancels `run`; the second cancels `teardown`.
///
/// tokio keeps its SIGINT handler installed once `ctrl_c` has been awaited,
/// so the default "kill on Ctrl-C" is gone for the rest of the process. A
/// third Ctrl-C exits immediately.
fn cancel_on_ctrl_c(run: CancelToken, teardown: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!(
            "Interrupted; stopping the run (Ctrl-C again to skip waiting for teardown)"
        );
        run.cancel();

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted again; no longer waiting for teardown");
        teardown.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("Interrupted three times; exiting");
            process::exit(EXIT_INTERRUPTED);
        }
    });
}

fn load_config(path: Option<&PathBuf>) -> Result<ProbeConfig> {
    ProbeConfig::load(path.map(PathBuf::as_path)).context("failed to load configuration")
}

fn api_client(config: &ProbeConfig) -> Result<(CloudClient, Arc<SecretRedactor>)> {
    let redactor = Arc::new(SecretRedactor::new(config.secrets()));
    let client = CloudClient::new(&config.api, Arc::clone(&redactor))
        .context("failed to build Cloud API client")?;
    Ok((client, redactor))
}

async fn run(
    config: ProbeConfig,
    keep: bool,
    report_path: Option<PathBuf>,
    cancel: CancelToken,
    abort_teardown: CancelToken,
) -> Result<ExitCode> {
    let (client, redactor) = api_client(&config)?;
    let connector = OpenSshConnector::new().context("an OpenSSH client is required")?;
    let keep = keep || config.probe.keep_datacenter;
    let report_path = report_path.or_else(|| config.probe.report_path.clone());

    let probe = Probe::new(config, client, connector, cancel, redactor)
        .abort_teardown_on(abort_teardown)
        .keep_datacenter(keep);
    let report = probe.run().await;
    print!("{report}");

    if let Some(path) = report_path {
        report
            .write(&path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Report written");
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn wait_ssh(
    config: ProbeConfig,
    host: String,
    timeout: Option<u64>,
    cancel: CancelToken,
) -> Result<ExitCode> {
    let mut ssh = config.ssh;
    if let Some(secs) = timeout {
        ssh.ready_timeout = Duration::from_secs(secs);
    }
    let target = SshTarget::new(host, ssh.port, ssh.user.clone())
        .with_identity(ssh.private_key_path.clone());
    let connector = OpenSshConnector::new().context("an OpenSSH client is required")?;
    let poller = ssh_poller(&ssh, cancel.clone());

    let display_target = target.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        wait_for_ssh(&connector, &target, &poller, &cancel).map(|mut ready| {
            if let Err(err) = ready.value.close() {
                tracing::debug!(error = %err, "Failed to close ssh session");
            }
            (ready.attempts, ready.elapsed)
        })
    })
    .await
    .context("ssh wait task failed")?;

    match outcome {
        Ok((attempts, elapsed)) => {
            println!(
                "{display_target} accepts ssh (after {attempts} attempt(s), {}s)",
                elapsed.as_secs()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{display_target}: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn teardown(
    config: ProbeConfig,
    datacenter_id: String,
    cancel: CancelToken,
) -> Result<ExitCode> {
    let (client, _) = api_client(&config)?;
    let id = DatacenterId::new(datacenter_id);
    delete_datacenter(&client, &id, &cancel)
        .await
        .with_context(|| format!("failed to delete datacenter {id}"))?;
    println!("datacenter {id} deleted");
    Ok(ExitCode::SUCCESS)
}

fn show_config(config: &ProbeConfig, path: Option<&PathBuf>) -> ExitCode {
    let source = path
        .cloned()
        .or_else(ProbeConfig::path)
        .map_or_else(|| "<none>".to_string(), |p| p.display().to_string());
    println!("# source: {source}");
    // Secret's Debug impl redacts; nothing sensitive is printed.
    println!("{config:#?}");
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_ref())?;
    let cancel = CancelToken::new();
    let abort_teardown = CancelToken::new();

    match cli.command {
        Command::Run { keep, report } => {
            cancel_on_ctrl_c(cancel.clone(), abort_teardown.clone());
            run(config, keep, report, cancel, abort_teardown).await
        }
        Command::WaitSsh { host, timeout } => {
            cancel_on_ctrl_c(cancel.clone(), abort_teardown);
            wait_ssh(config, host, timeout, cancel).await
        }
        Command::Teardown { datacenter_id } => {
            cancel_on_ctrl_c(cancel.clone(), cancel.clone());
            teardown(config, datacenter_id, cancel).await
        }
        Command::ShowConfig => Ok(show_config(&config, cli.config.as_ref())),
    }
}
