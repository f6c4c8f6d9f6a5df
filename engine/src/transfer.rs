//! Frontend-to-backend file transfer over SSH.
//!
//! Everything in here blocks; the scenario runs it on the blocking pool.

use std::path::PathBuf;
use std::time::Duration;

use dcprobe_config::SshSettings;
use dcprobe_core::{Backoff, CancelToken, Clock, PollError, PollPolicy, Poller, Ready};
use dcprobe_remote::{RemoteConnector, RemoteError, RemoteSession, SshTarget};
use dcprobe_utils::sanitize_display_text;

use crate::error::{CheckError, StepError};

/// Options for the frontend-to-backend hop. The backend host key is unknown
/// and there is nobody to confirm it.
const INNER_SSH_OPTIONS: &str =
    "-o BatchMode=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null";

/// Everything the transfer needs to know, resolved up front.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub frontend: SshTarget,
    pub backend_ip: String,
    pub backend_user: String,
    pub local_private_key: PathBuf,
    pub local_public_key: PathBuf,
    pub remote_private_key: String,
    pub remote_public_key: String,
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub connect_attempts: u32,
    pub connect_elapsed: Duration,
    /// Backend home directory listing, one entry per line.
    pub listing: String,
}

/// Readiness policy for SSH connections built from `[ssh]` settings.
#[must_use]
pub fn ssh_poller(settings: &SshSettings, cancel: CancelToken) -> Poller {
    let backoff = if settings.retry_backoff.is_zero() {
        Backoff::None
    } else {
        Backoff::Fixed(settings.retry_backoff)
    };
    Poller::new(PollPolicy::new(settings.ready_timeout, settings.attempt_timeout).with_backoff(backoff))
        .with_cancel(cancel)
}

/// Retry `connector.connect` until the host accepts an SSH session.
pub fn wait_for_ssh<C, K>(
    connector: &C,
    target: &SshTarget,
    poller: &Poller<K>,
    cancel: &CancelToken,
) -> Result<Ready<C::Session>, PollError<RemoteError>>
where
    C: RemoteConnector,
    K: Clock,
{
    let operation = format!("ssh-connect {target}");
    poller.run(&operation, RemoteError::failure_class, |ctx| {
        connector.connect(target, ctx, cancel)
    })
}

/// Connect to the frontend, push the key pair, create the test file there and
/// copy it to the backend over the private LAN. Returns once the backend
/// listing shows the file.
pub fn run_transfer<C, K>(
    connector: &C,
    plan: &TransferPlan,
    poller: &Poller<K>,
    cancel: &CancelToken,
) -> Result<TransferOutcome, StepError>
where
    C: RemoteConnector,
    K: Clock,
{
    let ready = wait_for_ssh(connector, &plan.frontend, poller, cancel)?;
    tracing::info!(
        host = %plan.frontend.host,
        attempts = ready.attempts,
        elapsed_ms = ready.elapsed.as_millis(),
        "Frontend accepts ssh"
    );

    let mut session = ready.value;
    let result = transfer_file(&mut session, plan);
    if let Err(err) = session.close() {
        tracing::warn!(host = %plan.frontend.host, error = %err, "Failed to close ssh session");
    }
    let listing = result?;

    if !listing.lines().any(|entry| entry.trim() == plan.file_name) {
        return Err(CheckError::NotListed {
            subject: format!("backend {}", plan.backend_ip),
            needle: plan.file_name.clone(),
            haystack: listing.split_whitespace().collect::<Vec<_>>().join(" "),
        }
        .into());
    }

    Ok(TransferOutcome {
        connect_attempts: ready.attempts,
        connect_elapsed: ready.elapsed,
        listing,
    })
}

fn transfer_file<S: RemoteSession>(session: &mut S, plan: &TransferPlan) -> Result<String, RemoteError> {
    session.upload(&plan.local_private_key, &plan.remote_private_key)?;
    session.upload(&plan.local_public_key, &plan.remote_public_key)?;
    session.exec_checked(&format!("chmod 400 {}", shell_quote(&plan.remote_private_key)))?;
    session.exec_checked(&format!(
        "echo {} > {}",
        shell_quote(&plan.message),
        shell_quote(&plan.file_name)
    ))?;
    session.exec_checked(&scp_to_backend_command(plan))?;
    let listing = session.exec_checked(&list_backend_command(plan))?;
    tracing::debug!(
        backend = %plan.backend_ip,
        listing = %sanitize_display_text(listing.stdout.trim()),
        "Backend listing"
    );
    Ok(listing.stdout)
}

fn backend_destination(plan: &TransferPlan) -> String {
    format!("{}@{}", plan.backend_user, plan.backend_ip)
}

pub(crate) fn scp_to_backend_command(plan: &TransferPlan) -> String {
    format!(
        "scp {INNER_SSH_OPTIONS} -i {} {} {}:",
        shell_quote(&plan.remote_private_key),
        shell_quote(&plan.file_name),
        shell_quote(&backend_destination(plan)),
    )
}

pub(crate) fn list_backend_command(plan: &TransferPlan) -> String {
    format!(
        "ssh {INNER_SSH_OPTIONS} -i {} {} ls -1",
        shell_quote(&plan.remote_private_key),
        shell_quote(&backend_destination(plan)),
    )
}

/// Single-quote `value` for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
