//! Supervision of one helper process: spawn, diagnostics, suspend, teardown.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::error::{PlaybackError, PlaybackResult};
use crate::launcher::ProcessKind;

pub struct ManagedChild {
    kind: ProcessKind,
    program: String,
    child: Child,
    suspended: bool,
    status: Option<ExitStatus>,
}

impl std::fmt::Debug for ManagedChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedChild")
            .field("kind", &self.kind)
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("suspended", &self.suspended)
            .field("status", &self.status)
            .finish()
    }
}

impl ManagedChild {
    /// Spawn `command` with stdout piped and stderr forwarded to `tracing`.
    ///
    /// The stderr reader stops at EOF or once `abort` is set. Must be called
    /// from inside a tokio runtime.
    pub fn spawn(
        kind: ProcessKind,
        mut command: Command,
        abort: Arc<AtomicBool>,
    ) -> PlaybackResult<Self> {
        let program = command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                tracing::error!(
                    process = kind.label(),
                    program = %program,
                    "`{program}` not found on PATH"
                );
            }
            PlaybackError::ProcessSpawn {
                process: kind.label(),
                program: program.clone(),
                source,
            }
        })?;
        tracing::debug!(process = kind.label(), pid = ?child.id(), program = %program, "spawned");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_diagnostics(kind, stderr, abort));
        }

        Ok(Self {
            kind,
            program,
            child,
            suspended: false,
            status: None,
        })
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Stop the process in place (SIGSTOP). No-op once it has exited.
    pub fn suspend(&mut self) {
        if self.suspended || self.status.is_some() {
            return;
        }
        if self.signal(signals::STOP) {
            self.suspended = true;
        }
    }

    /// Continue a suspended process (SIGCONT).
    pub fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.signal(signals::CONT);
        self.suspended = false;
    }

    /// Ask the process to exit, wait up to `grace`, then kill it. Safe to call
    /// repeatedly; later calls return the first status.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.status {
            return Some(status);
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.status = Some(status);
            return Some(status);
        }

        if self.suspended {
            self.signal(signals::CONT);
            self.suspended = false;
        }
        if self.signal(signals::TERM) {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                tracing::debug!(process = self.kind.label(), %status, "exited after terminate");
                self.status = Some(status);
                return Some(status);
            }
            tracing::debug!(
                process = self.kind.label(),
                grace_ms = grace.as_millis() as u64,
                "grace period elapsed, killing"
            );
        }

        if let Err(error) = self.child.start_kill() {
            tracing::debug!(process = self.kind.label(), %error, "kill failed");
        }
        match self.child.wait().await {
            Ok(status) => {
                self.status = Some(status);
                Some(status)
            }
            Err(error) => {
                tracing::warn!(process = self.kind.label(), %error, "failed to reap process");
                None
            }
        }
    }

    /// Wait for a natural exit.
    pub async fn wait(&mut self) -> PlaybackResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal) {
            Ok(()) => true,
            Err(errno) => {
                tracing::debug!(process = self.kind.label(), ?signal, %errno, "signal failed");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: signals::Unsupported) -> bool {
        false
    }
}

#[cfg(unix)]
mod signals {
    use nix::sys::signal::Signal;

    pub const STOP: Signal = Signal::SIGSTOP;
    pub const CONT: Signal = Signal::SIGCONT;
    pub const TERM: Signal = Signal::SIGTERM;
}

#[cfg(not(unix))]
mod signals {
    #[derive(Debug, Clone, Copy)]
    pub struct Unsupported;

    pub const STOP: Unsupported = Unsupported;
    pub const CONT: Unsupported = Unsupported;
    pub const TERM: Unsupported = Unsupported;
}

async fn forward_diagnostics(kind: ProcessKind, stderr: ChildStderr, abort: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::warn!(process = kind.label(), "{line}");
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(process = kind.label(), %error, "diagnostic stream closed");
                break;
            }
        }
    }
}
