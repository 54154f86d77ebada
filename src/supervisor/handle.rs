//! Handles given to the host for a running supervisor.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{RunState, SupervisorError};

/// Requests the host can send to the running subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCommand {
    /// SIGTERM, escalating to SIGKILL after the grace period.
    Terminate,
    /// Immediate SIGKILL.
    Kill,
}

#[derive(Debug)]
struct ProcessShared {
    pid: OnceLock<u32>,
    commands: mpsc::UnboundedSender<ProcessCommand>,
    exited: CancellationToken,
}

/// Non-owning reference to a supervised subprocess.
///
/// The supervisor keeps ownership of the child; this handle only lets the
/// host inspect it and ask for it to be stopped.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    shared: Arc<ProcessShared>,
}

impl ProcessHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ProcessCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = Self {
            shared: Arc::new(ProcessShared {
                pid: OnceLock::new(),
                commands,
                exited: CancellationToken::new(),
            }),
        };
        (handle, rx)
    }

    pub(crate) fn set_pid(&self, pid: u32) {
        let _ = self.shared.pid.set(pid);
    }

    pub(crate) fn mark_exited(&self) {
        self.shared.exited.cancel();
    }

    /// OS process id, once the subprocess has started.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.pid.get().copied()
    }

    /// Ask the subprocess to stop gracefully.
    pub fn terminate(&self) {
        self.send(ProcessCommand::Terminate);
    }

    /// Kill the subprocess immediately.
    pub fn kill(&self) {
        self.send(ProcessCommand::Kill);
    }

    /// Whether the subprocess has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.exited.is_cancelled()
    }

    /// Wait until the subprocess has exited.
    pub async fn exited(&self) {
        self.shared.exited.cancelled().await;
    }

    fn send(&self, command: ProcessCommand) {
        if self.is_finished() {
            tracing::debug!(?command, "Process already exited, ignoring command");
            return;
        }
        if self.shared.commands.send(command).is_err() {
            tracing::debug!(?command, "Supervisor gone, ignoring command");
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Correlation id supplied by the host.
    pub correlation_id: String,
    /// Retained output lines, in the order they were read.
    pub output: Vec<String>,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
    /// Lines seen during the run, including ones dropped by the ceiling.
    pub lines_seen: usize,
    /// Lines dropped or rejected by the ceiling.
    pub evicted: usize,
    /// An error line was detected.
    pub error_discovered: bool,
    /// The trailing summary block was seen.
    pub summary_started: bool,
    /// When the subprocess was spawned.
    pub started_at: DateTime<Utc>,
    /// When the completion callback was made.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Whether rsync exited with status zero and no error line was seen.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.error_discovered
    }

    /// Wall-clock time between spawn and completion.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Handle to a launched run.
#[derive(Debug)]
pub struct RunHandle {
    process: ProcessHandle,
    state: watch::Receiver<RunState>,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub(crate) fn new(
        process: ProcessHandle,
        state: watch::Receiver<RunState>,
        join: JoinHandle<RunReport>,
    ) -> Self {
        Self {
            process,
            state,
            join,
        }
    }

    /// Handle to the subprocess.
    #[must_use]
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Wait for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Join` if the driver task panicked or was aborted.
    pub async fn wait(self) -> Result<RunReport, SupervisorError> {
        Ok(self.join.await?)
    }
}
