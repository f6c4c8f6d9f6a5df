use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs;

use dcprobe_api::models::Server;
use dcprobe_api::{ApiError, CloudClient};
use dcprobe_config::ProbeConfig;
use dcprobe_core::CancelToken;
use dcprobe_remote::{RemoteConnector, SshTarget};
use dcprobe_types::{DatacenterId, ResourceState, ServerId, VmState};
use dcprobe_utils::{SecretRedactor, sanitize_display_text};

use crate::error::{StepError, check_eq, check_some_eq};
use crate::report::{ProbeReport, StepName};
use crate::topology::{PUBLIC_LAN, PUBLIC_LAN_NAME, describe_datacenter};
use crate::transfer::{TransferPlan, run_transfer, ssh_poller};

/// What earlier steps learned that later steps need.
#[derive(Debug, Default)]
struct RunState {
    datacenter: Option<DatacenterId>,
    frontend: Option<ServerId>,
}

impl RunState {
    fn datacenter(&self, step: StepName) -> Result<&DatacenterId, StepError> {
        self.datacenter
            .as_ref()
            .ok_or(StepError::MissingPrerequisite(step.as_str()))
    }

    fn frontend(&self, step: StepName) -> Result<&ServerId, StepError> {
        self.frontend
            .as_ref()
            .ok_or(StepError::MissingPrerequisite(step.as_str()))
    }
}

/// One end-to-end probe: provision, verify, resize, transfer, tear down.
pub struct Probe<C> {
    config: Arc<ProbeConfig>,
    client: CloudClient,
    connector: Arc<C>,
    cancel: CancelToken,
    /// Stops the teardown wait. Separate from `cancel` so a cancelled run
    /// still cleans up.
    abort_teardown: CancelToken,
    redactor: Arc<SecretRedactor>,
    keep_datacenter: bool,
}

impl<C> Probe<C>
where
    C: RemoteConnector + 'static,
{
    pub fn new(
        config: ProbeConfig,
        client: CloudClient,
        connector: C,
        cancel: CancelToken,
        redactor: Arc<SecretRedactor>,
    ) -> Self {
        let keep_datacenter = config.probe.keep_datacenter;
        Self {
            config: Arc::new(config),
            client,
            connector: Arc::new(connector),
            cancel,
            abort_teardown: CancelToken::new(),
            redactor,
            keep_datacenter,
        }
    }

    /// Token that abandons the teardown wait (a second Ctrl-C).
    #[must_use]
    pub fn abort_teardown_on(mut self, token: CancelToken) -> Self {
        self.abort_teardown = token;
        self
    }

    /// Leave the data center in place after the run.
    #[must_use]
    pub fn keep_datacenter(mut self, keep: bool) -> Self {
        self.keep_datacenter = keep;
        self
    }

    /// Run every step in order, stopping at the first failure, then tear down.
    ///
    /// Cancellation is honored between steps and inside the SSH and request
    /// waits. Teardown still runs after a cancel so no resources are left
    /// behind; only the teardown token abandons it.
    pub async fn run(&self) -> ProbeReport {
        let mut report = ProbeReport::new();
        let mut state = RunState::default();
        tracing::info!(
            run_id = %report.run_id,
            datacenter = %self.config.datacenter.name,
            location = %self.config.datacenter.location,
            "Starting probe run"
        );

        let mut failed = false;
        for step in StepName::SCENARIO {
            if failed {
                report.record_skipped(step);
                continue;
            }
            if self.cancel.is_cancelled() {
                tracing::warn!(step = %step, "Run cancelled");
                report.record_failed(step, Duration::ZERO, StepError::Cancelled.to_string());
                failed = true;
                continue;
            }

            failed = !self.execute(step, &mut state, &mut report).await;
            report.datacenter_id.clone_from(&state.datacenter);
        }

        if state.datacenter.is_some() {
            if self.keep_datacenter {
                tracing::info!(
                    datacenter_id = ?state.datacenter,
                    "Keeping datacenter; delete it with `dcprobe teardown`"
                );
            } else {
                self.execute(StepName::Teardown, &mut state, &mut report).await;
            }
        }

        report.finish();
        tracing::info!(
            run_id = %report.run_id,
            passed = report.passed(),
            "Probe run finished"
        );
        report
    }

    async fn execute(&self, step: StepName, state: &mut RunState, report: &mut ProbeReport) -> bool {
        let started = Instant::now();
        tracing::info!(step = %step, "Step started");
        let result = match step {
            StepName::CreateDatacenter => self.create_datacenter(state).await,
            StepName::FrontendRunning => self.frontend_running(state).await,
            StepName::ResizeFrontend => self.resize_frontend(state).await,
            StepName::FileTransfer => self.file_transfer(state).await,
            StepName::Teardown => self.teardown(state).await,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(detail) => {
                tracing::info!(
                    step = %step,
                    elapsed_ms = elapsed.as_millis(),
                    detail = %detail,
                    "Step passed"
                );
                report.record_passed(step, elapsed, self.redactor.redact(&detail));
                true
            }
            Err(err) => {
                // Remote stderr can carry escape sequences.
                let detail =
                    sanitize_display_text(&self.redactor.redact(&err.to_string())).into_owned();
                tracing::error!(
                    step = %step,
                    elapsed_ms = elapsed.as_millis(),
                    error = %detail,
                    "Step failed"
                );
                report.record_failed(step, elapsed, detail);
                false
            }
        }
    }

    async fn create_datacenter(&self, state: &mut RunState) -> Result<String, StepError> {
        let settings = &self.config.datacenter;
        let public_key = read_public_key(&self.config.ssh.public_key_path).await?;

        let images = self
            .client
            .find_images(&settings.image_name, &settings.location)
            .await?;
        let image = images.first().ok_or_else(|| StepError::NoMatchingImage {
            name: settings.image_name.clone(),
            location: settings.location.clone(),
        })?;
        tracing::info!(
            image_id = %image.id,
            image = %image.properties.name,
            candidates = images.len(),
            "Selected image"
        );

        let spec = describe_datacenter(settings, &image.id, &public_key);
        let accepted = self.client.create_datacenter(&spec).await?;
        let id = accepted.value.id.clone();
        state.datacenter = Some(id.clone());
        tracing::info!(
            datacenter_id = %id,
            request_id = %accepted.request,
            "Datacenter creation accepted"
        );
        self.client
            .wait_for_completion(&accepted.request, &self.cancel)
            .await?;

        let lan = self
            .client
            .update_lan(&id, PUBLIC_LAN, PUBLIC_LAN_NAME, true)
            .await?;
        self.client
            .wait_for_completion(&lan.request, &self.cancel)
            .await?;
        tracing::info!(datacenter_id = %id, lan = %PUBLIC_LAN, "LAN made public");

        let datacenter = self.client.get_datacenter(&id).await?;
        let subject = format!("datacenter {id}");
        check_some_eq(
            &subject,
            "state",
            &ResourceState::Available,
            datacenter.metadata.state.as_ref(),
        )?;
        check_eq(
            &subject,
            "name",
            settings.name.as_str(),
            datacenter.properties.name.as_str(),
        )?;
        check_eq(
            &subject,
            "location",
            settings.location.as_str(),
            datacenter.properties.location.as_str(),
        )?;

        Ok(format!(
            "datacenter {id} AVAILABLE in {} from image {}",
            settings.location, image.properties.name
        ))
    }

    async fn frontend_running(&self, state: &mut RunState) -> Result<String, StepError> {
        let datacenter = state.datacenter(StepName::FrontendRunning)?;
        let frontend = self
            .client
            .find_server_by_name(datacenter, &self.config.datacenter.frontend_name)
            .await?;
        check_running(&frontend)?;

        let detail = format!("server {} AVAILABLE and RUNNING", frontend.id);
        state.frontend = Some(frontend.id);
        Ok(detail)
    }

    async fn resize_frontend(&self, state: &mut RunState) -> Result<String, StepError> {
        let datacenter = state.datacenter(StepName::ResizeFrontend)?;
        let settings = &self.config.datacenter;
        let (initial, upgraded) = (settings.initial_size, settings.upgraded_size);

        let frontend = self
            .client
            .find_server_by_name(datacenter, &settings.frontend_name)
            .await?;
        check_size(&frontend, initial.cores(), initial.ram_mb())?;

        let accepted = self
            .client
            .update_server(datacenter, &frontend.id, upgraded)
            .await?;
        tracing::info!(
            datacenter_id = %datacenter,
            server_id = %frontend.id,
            from = %initial,
            to = %upgraded,
            "Server resize accepted"
        );
        self.client
            .wait_for_completion(&accepted.request, &self.cancel)
            .await?;

        let refreshed = self
            .client
            .find_server_by_name(datacenter, &settings.frontend_name)
            .await?;
        check_running(&refreshed)?;
        check_size(&refreshed, upgraded.cores(), upgraded.ram_mb())?;

        Ok(format!("server {} resized from {initial} to {upgraded}", refreshed.id))
    }

    async fn file_transfer(&self, state: &mut RunState) -> Result<String, StepError> {
        let datacenter = state.datacenter(StepName::FileTransfer)?;
        let frontend_id = state.frontend(StepName::FileTransfer)?;
        let dc = &self.config.datacenter;
        let ssh = &self.config.ssh;

        let public_nic = self
            .client
            .find_nic_by_name(datacenter, frontend_id, &dc.public_nic_name)
            .await?;
        let public_ip = public_nic
            .primary_ip()
            .ok_or_else(|| StepError::MissingIp {
                server: dc.frontend_name.to_string(),
                nic: dc.public_nic_name.to_string(),
            })?
            .to_string();

        let backend = self
            .client
            .find_server_by_name(datacenter, &dc.backend_name)
            .await?;
        let private_nic = self
            .client
            .find_nic_by_name(datacenter, &backend.id, &dc.private_nic_name)
            .await?;
        let backend_ip = private_nic
            .primary_ip()
            .ok_or_else(|| StepError::MissingIp {
                server: dc.backend_name.to_string(),
                nic: dc.private_nic_name.to_string(),
            })?
            .to_string();
        tracing::info!(%public_ip, %backend_ip, "Resolved server addresses");

        let plan = TransferPlan {
            frontend: SshTarget::new(public_ip, ssh.port, ssh.user.clone())
                .with_identity(ssh.private_key_path.clone()),
            backend_ip,
            backend_user: self.config.transfer.backend_user.clone(),
            local_private_key: ssh.private_key_path.clone(),
            local_public_key: ssh.public_key_path.clone(),
            remote_private_key: ssh.remote_private_key_path.clone(),
            remote_public_key: ssh.remote_public_key_path.clone(),
            file_name: self.config.transfer.file_name.to_string(),
            message: self.config.transfer.message.clone(),
        };

        let connector = Arc::clone(&self.connector);
        let poller = ssh_poller(ssh, self.cancel.clone());
        let cancel = self.cancel.clone();
        let task_plan = plan.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            run_transfer(connector.as_ref(), &task_plan, &poller, &cancel)
        })
        .await??;

        Ok(format!(
            "{} copied to {}@{} (ssh ready after {} attempt(s), {}s)",
            plan.file_name,
            plan.backend_user,
            plan.backend_ip,
            outcome.connect_attempts,
            outcome.connect_elapsed.as_secs()
        ))
    }

    async fn teardown(&self, state: &mut RunState) -> Result<String, StepError> {
        let datacenter = state.datacenter(StepName::Teardown)?;
        delete_datacenter(&self.client, datacenter, &self.abort_teardown).await?;
        Ok(format!("datacenter {datacenter} deleted"))
    }
}

/// Delete a data center and wait until the API reports the deletion done.
///
/// Cancelling `cancel` stops the wait; the deletion itself was already
/// accepted and carries on.
pub async fn delete_datacenter(
    client: &CloudClient,
    id: &DatacenterId,
    cancel: &CancelToken,
) -> Result<(), ApiError> {
    let request = client.delete_datacenter(id).await?;
    tracing::info!(datacenter_id = %id, request_id = %request, "Datacenter deletion accepted");
    client.wait_for_completion(&request, cancel).await?;
    tracing::info!(datacenter_id = %id, "Datacenter deleted");
    Ok(())
}

async fn read_public_key(path: &Path) -> Result<String, StepError> {
    let key = fs::read_to_string(path)
        .await
        .map_err(|source| StepError::ReadKey {
            path: path.to_path_buf(),
            source,
        })?;
    if key.trim().is_empty() {
        return Err(StepError::EmptyKey(path.to_path_buf()));
    }
    Ok(key)
}

fn check_running(server: &Server) -> Result<(), StepError> {
    let subject = format!("server {}", server.properties.name);
    check_some_eq(
        &subject,
        "state",
        &ResourceState::Available,
        server.metadata.state.as_ref(),
    )?;
    check_some_eq(
        &subject,
        "vmState",
        &VmState::Running,
        server.properties.vm_state.as_ref(),
    )?;
    Ok(())
}

fn check_size(server: &Server, cores: u32, ram_mb: u32) -> Result<(), StepError> {
    let subject = format!("server {}", server.properties.name);
    check_eq(&subject, "cores", &cores, &server.properties.cores)?;
    check_eq(&subject, "ram", &ram_mb, &server.properties.ram)?;
    Ok(())
}
