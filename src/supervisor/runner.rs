//! Supervisor runner for a single rsync invocation.
//!
//! This module launches the subprocess with stdout and stderr merged into
//! one pipe, then drives a single task that multiplexes pipe readiness,
//! host commands and the exit notification. Once the process exits, pipe
//! polling stops, remaining bytes are drained, and the host is notified
//! exactly once.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use crate::capture::OutputCapture;
use crate::classify::RsyncVariant;
use crate::config::SupervisorConfig;
use crate::supervisor::{
    ErrorLogger, LineMode, LinePolicy, LineSplitter, OutputBuffer, OutputSink, ProcessCommand,
    ProcessHandle, RunFlags, RunHandle, RunReport, RunState, RunStateMachine, SupervisorError,
    TracingErrorLogger,
};

/// Correlation id used when the host does not supply one.
pub const DEFAULT_CORRELATION_ID: &str = "none";

/// Size of a single `read` from the output pipe.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound on bytes consumed in one readiness wake-up.
const MAX_BATCH_BYTES: usize = 256 * 1024;

/// Supervisor for one rsync subprocess.
///
/// Build it with [`Supervisor::new`] and the builder methods, then call
/// [`Supervisor::launch`]. Launching consumes the supervisor, so a
/// supervisor runs at most one process.
pub struct Supervisor {
    arguments: Vec<String>,
    correlation_id: String,
    sink: Arc<dyn OutputSink>,
    report_progress: bool,
    variant: RsyncVariant,
    flags: RunFlags,
    config: SupervisorConfig,
    capture: Option<OutputCapture>,
    error_logger: Arc<dyn ErrorLogger>,
    state: RunStateMachine,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("arguments", &self.arguments)
            .field("correlation_id", &self.correlation_id)
            .field("report_progress", &self.report_progress)
            .field("variant", &self.variant)
            .field("flags", &self.flags)
            .field("state", &self.state.state())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor for `arguments`, reporting to `sink`.
    #[must_use]
    pub fn new<I, S>(arguments: I, sink: Arc<dyn OutputSink>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arguments: Vec<String> = arguments.into_iter().map(Into::into).collect();
        let flags = RunFlags::from_args(arguments.as_slice());
        Self {
            arguments,
            correlation_id: DEFAULT_CORRELATION_ID.to_string(),
            sink,
            report_progress: false,
            variant: RsyncVariant::default(),
            flags,
            config: SupervisorConfig::default(),
            capture: None,
            error_logger: Arc::new(TracingErrorLogger),
            state: RunStateMachine::new(),
        }
    }

    /// Set the opaque id passed back with the completion callback.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Enable or disable progress callbacks.
    #[must_use]
    pub fn report_progress(mut self, enabled: bool) -> Self {
        self.report_progress = enabled;
        self
    }

    /// Select the output parsing rules for the rsync flavour being run.
    #[must_use]
    pub fn variant(mut self, variant: RsyncVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Enable or disable passing lines to [`OutputSink::check_line`].
    #[must_use]
    pub fn check_errors(mut self, enabled: bool) -> Self {
        self.config.check_errors = enabled;
        self
    }

    /// Override ceilings, timings and error checking.
    #[must_use]
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirror every output line into a shared capture store.
    #[must_use]
    pub fn capture(mut self, capture: OutputCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Replace the collaborator that records failed runs.
    #[must_use]
    pub fn error_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.error_logger = logger;
        self
    }

    /// Flags derived from the argument list.
    #[must_use]
    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    /// Line mode this run will use.
    #[must_use]
    pub fn line_mode(&self) -> LineMode {
        LineMode::select(self.flags, self.variant)
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state.state()
    }

    /// Start the subprocess and supervise it in the background.
    ///
    /// Returns as soon as the process has been spawned. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `ExecutableNotFound` if the sink resolves no path.
    /// - `InvalidExecutablePath` if the path is not an executable file.
    /// - `Pipe` if the output pipe cannot be created.
    /// - `ProcessLaunchFailed` if spawning fails.
    pub fn launch(self) -> Result<RunHandle, SupervisorError> {
        self.state.transition(RunState::Launching);
        match self.spawn() {
            Ok((child, reader, process, commands)) => {
                self.state.transition(RunState::Running);
                let state_rx = self.state.subscribe();
                let driver = Driver::new(self, child, reader, process.clone(), commands);
                let join = tokio::spawn(driver.run());
                Ok(RunHandle::new(process, state_rx, join))
            }
            Err(e) => {
                tracing::warn!(error = %e, correlation_id = %self.correlation_id, "Launch failed");
                self.state.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    fn resolve_executable(&self) -> Result<PathBuf, SupervisorError> {
        let path = self
            .sink
            .resolve_executable()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(SupervisorError::ExecutableNotFound)?;
        if !is_executable_file(&path) {
            return Err(SupervisorError::InvalidExecutablePath(path));
        }
        Ok(path)
    }

    fn spawn(
        &self,
    ) -> Result<
        (
            Child,
            pipe::Receiver,
            ProcessHandle,
            UnboundedReceiver<ProcessCommand>,
        ),
        SupervisorError,
    > {
        let executable = self.resolve_executable()?;

        let (sender, reader) = pipe::pipe().map_err(SupervisorError::Pipe)?;
        let stdout = sender.into_blocking_fd().map_err(SupervisorError::Pipe)?;
        let stderr = stdout.try_clone().map_err(SupervisorError::Pipe)?;

        let mut command = Command::new(&executable);
        command
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(environment) = self.sink.environment() {
            command.envs(environment);
        }

        let (process, commands) = ProcessHandle::new();
        self.sink.set_process(Some(process.clone()));

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.sink.set_process(None);
                return Err(SupervisorError::ProcessLaunchFailed(e));
            }
        };
        // Close our copies of the write end so EOF is seen once the child exits.
        drop(command);

        if let Some(pid) = child.id() {
            process.set_pid(pid);
        }
        tracing::info!(
            executable = %executable.display(),
            args = ?self.arguments,
            pid = ?child.id(),
            correlation_id = %self.correlation_id,
            mode = ?self.line_mode(),
            "Launched rsync"
        );

        Ok((child, reader, process, commands))
    }
}

fn is_executable_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Bytes collected from one pass over the pipe.
#[derive(Debug, Default)]
struct PipeRead {
    data: Vec<u8>,
    eof: bool,
}

/// Background task state for a launched run.
struct Driver {
    correlation_id: String,
    sink: Arc<dyn OutputSink>,
    capture: Option<OutputCapture>,
    error_logger: Arc<dyn ErrorLogger>,
    config: SupervisorConfig,
    state: RunStateMachine,
    child: Child,
    reader: pipe::Receiver,
    process: ProcessHandle,
    commands: UnboundedReceiver<ProcessCommand>,
    splitter: LineSplitter,
    buffer: OutputBuffer,
    policy: LinePolicy,
    read_buf: Vec<u8>,
    eof: bool,
    started_at: DateTime<Utc>,
}

impl Driver {
    fn new(
        supervisor: Supervisor,
        child: Child,
        reader: pipe::Receiver,
        process: ProcessHandle,
        commands: UnboundedReceiver<ProcessCommand>,
    ) -> Self {
        let mode = supervisor.line_mode();
        let policy = LinePolicy::new(
            mode,
            supervisor.flags,
            supervisor.report_progress,
            supervisor.config.check_errors,
        );
        let buffer = OutputBuffer::new(
            supervisor.config.max_output_lines,
            supervisor.config.overflow_policy,
        );
        Self {
            correlation_id: supervisor.correlation_id,
            sink: supervisor.sink,
            capture: supervisor.capture,
            error_logger: supervisor.error_logger,
            config: supervisor.config,
            state: supervisor.state,
            child,
            reader,
            process,
            commands,
            splitter: LineSplitter::new(),
            buffer,
            policy,
            read_buf: vec![0; READ_CHUNK_SIZE],
            eof: false,
            started_at: Utc::now(),
        }
    }

    async fn run(mut self) -> RunReport {
        let status = self.watch().await;
        self.process.mark_exited();
        self.state.transition(RunState::Draining);
        self.drain().await;
        self.finish(status).await
    }

    /// Process output until the child exits.
    async fn watch(&mut self) -> Option<ExitStatus> {
        let mut commands_open = true;
        let mut kill_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                status = self.child.wait() => {
                    return match status {
                        Ok(status) => {
                            tracing::info!(
                                code = ?status.code(),
                                signal = ?status.signal(),
                                correlation_id = %self.correlation_id,
                                "rsync exited"
                            );
                            Some(status)
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to wait for rsync");
                            None
                        }
                    };
                }
                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => {
                            if let Some(deadline) = self.handle_command(command) {
                                kill_deadline = Some(deadline);
                            }
                        }
                        None => commands_open = false,
                    }
                }
                () = sleep_until(kill_deadline.unwrap_or_else(Instant::now)), if kill_deadline.is_some() => {
                    tracing::warn!("Grace period elapsed, killing rsync");
                    kill_deadline = None;
                    if let Err(e) = self.child.start_kill() {
                        tracing::warn!(error = %e, "Failed to kill rsync");
                    }
                }
                ready = self.reader.readable(), if !self.eof => {
                    match ready {
                        Ok(()) => {
                            let read = self.read_available();
                            self.handle_batch(&read.data).await;
                        }
                        Err(e) => {
                            self.eof = true;
                            self.sink.report_error(SupervisorError::Pipe(e));
                        }
                    }
                }
            }
        }
    }

    /// Returns a kill deadline when a graceful stop was requested.
    fn handle_command(&mut self, command: ProcessCommand) -> Option<Instant> {
        match command {
            ProcessCommand::Terminate => {
                let pid = self.child.id()?;
                send_sigterm(pid);
                Some(Instant::now() + self.config.terminate_grace())
            }
            ProcessCommand::Kill => {
                tracing::info!("Killing rsync on request");
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!(error = %e, "Failed to kill rsync");
                }
                None
            }
        }
    }

    /// Read everything available without blocking.
    fn read_available(&mut self) -> PipeRead {
        let mut read = PipeRead::default();
        while read.data.len() < MAX_BATCH_BYTES {
            match self.reader.try_read(&mut self.read_buf) {
                Ok(0) => {
                    tracing::debug!("Output pipe closed");
                    read.eof = true;
                    break;
                }
                Ok(n) => read.data.extend_from_slice(&self.read_buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    read.eof = true;
                    self.sink.report_error(SupervisorError::Pipe(e));
                    break;
                }
            }
        }
        if read.eof {
            self.eof = true;
        }
        read
    }

    /// Split, record and classify one batch while the process runs.
    async fn handle_batch(&mut self, data: &[u8]) {
        let lines = self.ingest(data).await;
        if lines.is_empty() {
            return;
        }
        tracing::debug!(
            lines = lines.len(),
            total = self.buffer.total(),
            mode = ?self.policy.mode(),
            "Output batch"
        );

        let sink = &self.sink;
        let outcome = self
            .policy
            .process_batch(&lines, self.buffer.total(), |line| sink.check_line(line));
        if let Some(error) = outcome.error {
            self.sink.report_error(error.into());
        }
        if let Some(count) = outcome.progress {
            self.sink.report_progress(count);
        }
    }

    /// Decode `data` and append the resulting lines everywhere they go.
    async fn ingest(&mut self, data: &[u8]) -> Vec<String> {
        if data.is_empty() {
            return Vec::new();
        }
        match self.splitter.push(data) {
            Ok(lines) => {
                for line in &lines {
                    self.record(line).await;
                }
                lines
            }
            Err(e) => {
                tracing::warn!(bytes = data.len(), "Discarding undecodable output");
                self.sink.report_error(e);
                Vec::new()
            }
        }
    }

    async fn record(&mut self, line: &str) {
        self.buffer.push(line.to_string());
        self.sink.live_line(line);
        if let Some(capture) = &self.capture {
            capture.capture_line(line).await;
        }
    }

    /// Collect output still buffered after the process exited.
    async fn drain(&mut self) {
        if self.eof {
            return;
        }
        sleep(self.config.pre_drain_delay()).await;

        let mut drained = 0usize;
        loop {
            match timeout(self.config.drain_pause(), self.reader.readable()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    self.sink.report_error(SupervisorError::Pipe(e));
                    break;
                }
                Ok(Ok(())) => {
                    let read = self.read_available();
                    let lines = self.ingest(&read.data).await;
                    drained += lines.len();
                    self.check_late_errors(&lines);
                    if read.eof || drained >= self.config.max_output_lines {
                        break;
                    }
                }
            }
        }
        tracing::debug!(lines = drained, "Drain complete");
    }

    fn check_late_errors(&mut self, lines: &[String]) {
        let sink = &self.sink;
        if let Some(error) = self
            .policy
            .check_errors_only(lines, |line| sink.check_line(line))
        {
            self.sink.report_error(error.into());
        }
    }

    async fn finish(mut self, status: Option<ExitStatus>) -> RunReport {
        if self.splitter.has_pending() {
            tracing::debug!("Flushing unterminated final line");
        }
        match self.splitter.finish() {
            Ok(Some(line)) => {
                self.record(&line).await;
                self.check_late_errors(std::slice::from_ref(&line));
            }
            Ok(None) => {}
            Err(e) => self.sink.report_error(e),
        }

        let lines_seen = self.buffer.total();
        let evicted = self.buffer.evicted();
        let has_output = !self.buffer.is_empty();
        tracing::debug!(retained = self.buffer.len(), lines_seen, evicted, "Run output collected");
        let output = self.buffer.into_lines();
        let delivered = has_output.then(|| output.clone());
        self.sink.report_completion(delivered, &self.correlation_id);
        let finished_at = Utc::now();
        self.sink.set_process(None);

        if self.policy.error_discovered() {
            let logger = Arc::clone(&self.error_logger);
            let correlation_id = self.correlation_id.clone();
            let lines = output.clone();
            tokio::spawn(async move {
                logger.log_failed_run(&correlation_id, &lines).await;
            });
        }

        self.state.transition(RunState::Terminated);

        RunReport {
            correlation_id: self.correlation_id,
            output,
            exit_code: status.and_then(|s| s.code()),
            signal: status.and_then(|s| s.signal()),
            lines_seen,
            evicted,
            error_discovered: self.policy.error_discovered(),
            summary_started: self.policy.summary_started(),
            started_at: self.started_at,
            finished_at,
        }
    }
}

fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    tracing::info!(pid, "Sending SIGTERM to rsync");
    let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
    if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "Failed to send SIGTERM");
    }
}
