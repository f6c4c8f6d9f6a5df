//! Subprocess supervision for `ssh`/`scp` children.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use dcprobe_core::CancelToken;

use crate::error::RemoteError;

/// How often a supervised child is checked while waiting on it.
pub(crate) const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Call `disarm()` once the process has been reaped to prevent the kill.
pub(crate) struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    /// Spawn `command` in its own process group so the whole tree can be killed.
    pub(crate) fn spawn(mut command: Command, program: &str) -> Result<Self, RemoteError> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().map_err(|source| RemoteError::Spawn {
            program: program.to_string(),
            source,
        })?;
        Ok(Self { child, armed: true })
    }

    pub(crate) fn try_wait(&mut self) -> Result<Option<ExitStatus>, RemoteError> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.armed = false;
        }
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        #[cfg(unix)]
        {
            let pid = self.child.id() as libc::pid_t;
            // SAFETY: killpg only signals; the group id is the child we spawned
            // with process_group(0) and have not yet reaped.
            let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
            if rc == -1 {
                let _ = self.child.kill();
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Why a supervised child was killed before it exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupted {
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

#[derive(Debug)]
pub(crate) enum RunError {
    Interrupted(Interrupted),
    Remote(RemoteError),
}

impl From<RemoteError> for RunError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

impl From<std::io::Error> for RunError {
    fn from(err: std::io::Error) -> Self {
        Self::Remote(RemoteError::Io(err))
    }
}

/// Run `command` to completion, killing it when `timeout` elapses or `cancel`
/// fires.
///
/// Output is spooled to anonymous temp files rather than pipes so a chatty
/// child can never block on a full pipe while we poll it.
pub(crate) fn run_supervised(
    mut command: Command,
    program: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Finished, RunError> {
    let mut stdout = tempfile::tempfile()?;
    let mut stderr = tempfile::tempfile()?;
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout.try_clone()?))
        .stderr(Stdio::from(stderr.try_clone()?));

    let mut guard = ChildGuard::spawn(command, program)?;
    let status = wait_supervised(&mut guard, timeout, cancel)?;

    Ok(Finished {
        status,
        stdout: read_spool(&mut stdout)?,
        stderr: read_spool(&mut stderr)?,
    })
}

pub(crate) fn wait_supervised(
    guard: &mut ChildGuard,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ExitStatus, RunError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = guard.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            return Err(RunError::Interrupted(Interrupted::Cancelled));
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(RunError::Interrupted(Interrupted::TimedOut));
        }
        cancel.wait_timeout(CHILD_POLL_INTERVAL.min(deadline - now));
    }
}

pub(crate) fn read_spool(file: &mut File) -> Result<String, RemoteError> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::thread;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn captures_output_and_status() {
        let finished = run_supervised(
            sh("echo out; echo err >&2; exit 3"),
            "sh",
            Duration::from_secs(10),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(finished.status.code(), Some(3));
        assert_eq!(finished.stdout, "out\n");
        assert_eq!(finished.stderr, "err\n");
    }

    #[test]
    fn kills_child_after_timeout() {
        let started = Instant::now();
        let result = run_supervised(
            sh("sleep 30"),
            "sh",
            Duration::from_millis(100),
            &CancelToken::new(),
        );

        assert!(matches!(
            result,
            Err(RunError::Interrupted(Interrupted::TimedOut))
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellation_interrupts_wait() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let started = Instant::now();
        let result = run_supervised(sh("sleep 30"), "sh", Duration::from_secs(60), &cancel);
        handle.join().unwrap();

        assert!(matches!(
            result,
            Err(RunError::Interrupted(Interrupted::Cancelled))
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let result = run_supervised(
            Command::new("/nonexistent/dcprobe-test-binary"),
            "dcprobe-test-binary",
            Duration::from_secs(1),
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(RunError::Remote(RemoteError::Spawn { .. }))
        ));
    }
}
