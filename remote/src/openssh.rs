//! [`RemoteConnector`] over the system OpenSSH client.
//!
//! A connection is a foreground `ssh -M -N` control master. It counts as
//! established once its control socket appears; every later `ssh`/`scp`
//! invocation multiplexes over that socket, so authentication happens once.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dcprobe_core::{AttemptContext, CancelToken};
use tempfile::TempDir;

use crate::classify::{connect_failure, last_line};
use crate::error::RemoteError;
use crate::process::{
    CHILD_POLL_INTERVAL, ChildGuard, Interrupted, RunError, read_spool, run_supervised,
};
use crate::{CommandOutput, RemoteConnector, RemoteSession, SshTarget};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const SERVER_ALIVE_INTERVAL_SECS: u64 = 15;

#[derive(Debug)]
pub struct OpenSshConnector {
    ssh: PathBuf,
    scp: PathBuf,
    /// Control sockets and the dedicated known-hosts file.
    state: Arc<TempDir>,
    command_timeout: Duration,
    next_socket: AtomicU32,
}

impl OpenSshConnector {
    /// Resolve `ssh` and `scp` from `PATH`.
    pub fn new() -> Result<Self, RemoteError> {
        let ssh = which::which("ssh").map_err(|_| RemoteError::BinaryNotFound("ssh"))?;
        let scp = which::which("scp").map_err(|_| RemoteError::BinaryNotFound("scp"))?;
        Self::with_binaries(ssh, scp)
    }

    pub fn with_binaries(ssh: PathBuf, scp: PathBuf) -> Result<Self, RemoteError> {
        let state = tempfile::Builder::new().prefix("dcprobe-ssh").tempdir()?;
        tracing::debug!(
            ssh = %ssh.display(),
            scp = %scp.display(),
            state_dir = %state.path().display(),
            "OpenSSH connector ready"
        );
        Ok(Self {
            ssh,
            scp,
            state: Arc::new(state),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            next_socket: AtomicU32::new(0),
        })
    }

    /// Upper bound for a single command or transfer on an open session.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn known_hosts(&self) -> PathBuf {
        self.state.path().join("known_hosts")
    }

    fn next_control_path(&self) -> PathBuf {
        let id = self.next_socket.fetch_add(1, Ordering::Relaxed);
        self.state.path().join(format!("cm-{id}"))
    }

    pub(crate) fn master_args(
        &self,
        target: &SshTarget,
        control: &Path,
        attempt_timeout: Duration,
    ) -> Vec<OsString> {
        // ConnectTimeout takes whole seconds and treats 0 as "no timeout".
        let connect_secs = attempt_timeout.as_secs().max(1);
        let mut args: Vec<OsString> = vec!["-M".into(), "-N".into()];
        push_option(&mut args, format!("ConnectTimeout={connect_secs}"));
        push_option(
            &mut args,
            format!("ServerAliveInterval={SERVER_ALIVE_INTERVAL_SECS}"),
        );
        args.extend(common_options(target, &self.known_hosts(), control));
        args.push("-p".into());
        args.push(target.port.to_string().into());
        args.push(target.destination().into());
        args
    }
}

impl RemoteConnector for OpenSshConnector {
    type Session = OpenSshSession;

    fn connect(
        &self,
        target: &SshTarget,
        ctx: &AttemptContext,
        cancel: &CancelToken,
    ) -> Result<Self::Session, RemoteError> {
        let control = self.next_control_path();
        tracing::debug!(
            host = %target.host,
            port = target.port,
            attempt = ctx.attempt,
            timeout_ms = ctx.timeout.as_millis(),
            "Opening ssh control master"
        );

        let mut stderr = tempfile::tempfile()?;
        let mut command = Command::new(&self.ssh);
        command
            .args(self.master_args(target, &control, ctx.timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr.try_clone()?));
        let mut master = ChildGuard::spawn(command, "ssh")?;

        let deadline = Instant::now() + ctx.timeout;
        loop {
            if let Some(status) = master.try_wait()? {
                let text = read_spool(&mut stderr)?;
                return Err(connect_failure(&target.host, status, &text));
            }
            if control.exists() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(RemoteError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RemoteError::AttemptTimedOut {
                    host: target.host.clone(),
                    timeout: ctx.timeout,
                });
            }
            cancel.wait_timeout(CHILD_POLL_INTERVAL.min(deadline - now));
        }

        tracing::info!(host = %target.host, attempt = ctx.attempt, "ssh connection established");
        Ok(OpenSshSession {
            ssh: self.ssh.clone(),
            scp: self.scp.clone(),
            target: target.clone(),
            known_hosts: self.known_hosts(),
            control,
            command_timeout: self.command_timeout,
            cancel: cancel.clone(),
            master: Some(master),
            _master_stderr: stderr,
            _state: Arc::clone(&self.state),
        })
    }
}

/// An open control master. Dropping it kills the master.
pub struct OpenSshSession {
    ssh: PathBuf,
    scp: PathBuf,
    target: SshTarget,
    known_hosts: PathBuf,
    control: PathBuf,
    command_timeout: Duration,
    cancel: CancelToken,
    master: Option<ChildGuard>,
    _master_stderr: File,
    _state: Arc<TempDir>,
}

impl OpenSshSession {
    pub(crate) fn exec_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = common_options(&self.target, &self.known_hosts, &self.control);
        args.push("-p".into());
        args.push(self.target.port.to_string().into());
        args.push(self.target.destination().into());
        args.push("--".into());
        args.push(remote_command.into());
        args
    }

    pub(crate) fn scp_args(&self, from: OsString, to: OsString) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-q".into()];
        args.extend(common_options(&self.target, &self.known_hosts, &self.control));
        args.push("-P".into());
        args.push(self.target.port.to_string().into());
        args.push(from);
        args.push(to);
        args
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{path}", self.target.destination())
    }

    fn transfer(&self, from: OsString, to: OsString) -> Result<(), RemoteError> {
        let label_from = from.to_string_lossy().into_owned();
        let label_to = to.to_string_lossy().into_owned();
        let mut command = Command::new(&self.scp);
        command.args(self.scp_args(from, to));

        let finished = run_supervised(command, "scp", self.command_timeout, &self.cancel)
            .map_err(|err| self.interrupted("scp", err))?;
        if finished.status.success() {
            tracing::debug!(from = %label_from, to = %label_to, "Transfer complete");
            Ok(())
        } else {
            Err(RemoteError::TransferFailed {
                from: label_from,
                to: label_to,
                detail: last_line(&finished.stderr),
            })
        }
    }

    fn interrupted(&self, command: &str, err: RunError) -> RemoteError {
        match err {
            RunError::Interrupted(Interrupted::Cancelled) => RemoteError::Cancelled,
            RunError::Interrupted(Interrupted::TimedOut) => RemoteError::CommandTimedOut {
                command: command.to_string(),
                timeout: self.command_timeout,
            },
            RunError::Remote(err) => err,
        }
    }
}

impl RemoteSession for OpenSshSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        tracing::debug!(host = %self.target.host, command, "Running remote command");
        let mut process = Command::new(&self.ssh);
        process.args(self.exec_args(command));

        let finished = run_supervised(process, "ssh", self.command_timeout, &self.cancel)
            .map_err(|err| self.interrupted(command, err))?;
        Ok(CommandOutput {
            status: finished.status.code(),
            stdout: finished.stdout,
            stderr: finished.stderr,
        })
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if !local.is_file() {
            return Err(RemoteError::LocalFile {
                path: local.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        self.transfer(local.as_os_str().to_owned(), self.remote_spec(remote).into())
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.transfer(self.remote_spec(remote).into(), local.as_os_str().to_owned())
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        let Some(mut master) = self.master.take() else {
            return Ok(());
        };
        let mut command = Command::new(&self.ssh);
        command
            .args(common_options(&self.target, &self.known_hosts, &self.control))
            .args(["-O", "exit"])
            .arg(self.target.destination());
        // Best effort: if the master ignores the request, the guard kills it.
        let quick = CancelToken::new();
        if let Err(err) = run_supervised(command, "ssh", Duration::from_secs(5), &quick) {
            tracing::debug!(host = %self.target.host, ?err, "ssh -O exit failed");
        }
        let _ = master.try_wait();
        tracing::debug!(host = %self.target.host, "ssh connection closed");
        Ok(())
    }
}

fn push_option(args: &mut Vec<OsString>, option: String) {
    args.push("-o".into());
    args.push(option.into());
}

fn common_options(target: &SshTarget, known_hosts: &Path, control: &Path) -> Vec<OsString> {
    let mut args = Vec::new();
    push_option(&mut args, "BatchMode=yes".to_string());
    push_option(&mut args, "StrictHostKeyChecking=accept-new".to_string());
    push_option(
        &mut args,
        format!("UserKnownHostsFile={}", known_hosts.display()),
    );
    push_option(&mut args, format!("ControlPath={}", control.display()));
    if let Some(identity) = &target.identity {
        args.push("-i".into());
        args.push(identity.as_os_str().to_owned());
        push_option(&mut args, "IdentitiesOnly=yes".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> OpenSshConnector {
        OpenSshConnector::with_binaries(PathBuf::from("/usr/bin/ssh"), PathBuf::from("/usr/bin/scp"))
            .unwrap()
    }

    fn target() -> SshTarget {
        SshTarget::new("203.0.113.7", 2222, "root")
            .with_identity(PathBuf::from("/home/probe/.ssh/id_rsa"))
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn master_args_carry_timeouts_and_host_key_policy() {
        let connector = connector();
        let control = connector.next_control_path();
        let args = strings(&connector.master_args(&target(), &control, Duration::from_secs(60)));

        assert_eq!(&args[..2], ["-M", "-N"]);
        assert!(args.contains(&"ConnectTimeout=60".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&format!("ControlPath={}", control.display())));
        assert!(args.iter().any(|a| a.starts_with("UserKnownHostsFile=")));
        assert!(args.contains(&"/home/probe/.ssh/id_rsa".to_string()));
        assert_eq!(&args[args.len() - 3..], ["-p", "2222", "root@203.0.113.7"]);
    }

    #[test]
    fn sub_second_attempt_timeout_rounds_up() {
        let connector = connector();
        let control = connector.next_control_path();
        let args = strings(&connector.master_args(&target(), &control, Duration::from_millis(300)));
        assert!(args.contains(&"ConnectTimeout=1".to_string()));
    }

    #[test]
    fn control_paths_are_unique() {
        let connector = connector();
        assert_ne!(connector.next_control_path(), connector.next_control_path());
    }

    #[test]
    fn session_args_multiplex_over_control_path() {
        let connector = connector();
        let control = connector.next_control_path();
        let session = OpenSshSession {
            ssh: connector.ssh.clone(),
            scp: connector.scp.clone(),
            target: target(),
            known_hosts: connector.known_hosts(),
            control: control.clone(),
            command_timeout: Duration::from_secs(5),
            cancel: CancelToken::new(),
            master: None,
            _master_stderr: tempfile::tempfile().unwrap(),
            _state: Arc::clone(&connector.state),
        };

        let exec = strings(&session.exec_args("ls ~"));
        assert!(exec.contains(&format!("ControlPath={}", control.display())));
        assert_eq!(&exec[exec.len() - 2..], ["--", "ls ~"]);

        let scp = strings(&session.scp_args(
            "/tmp/key".into(),
            session.remote_spec("/root/.ssh/id_rsa").into(),
        ));
        assert_eq!(scp[0], "-q");
        assert!(scp.windows(2).any(|w| w == ["-P", "2222"]));
        assert_eq!(&scp[scp.len() - 2..], ["/tmp/key", "root@203.0.113.7:/root/.ssh/id_rsa"]);
    }

    #[test]
    fn upload_of_missing_file_fails_locally() {
        let connector = connector();
        let mut session = OpenSshSession {
            ssh: connector.ssh.clone(),
            scp: connector.scp.clone(),
            target: target(),
            known_hosts: connector.known_hosts(),
            control: connector.next_control_path(),
            command_timeout: Duration::from_secs(5),
            cancel: CancelToken::new(),
            master: None,
            _master_stderr: tempfile::tempfile().unwrap(),
            _state: Arc::clone(&connector.state),
        };

        let err = session
            .upload(Path::new("/nonexistent/dcprobe/key"), "/root/key")
            .unwrap_err();
        assert!(matches!(err, RemoteError::LocalFile { .. }));
        session.close().unwrap();
    }
}
