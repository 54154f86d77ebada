//! Supervisor module tests.

mod lifecycle_test;
mod progress_test;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rsync_supervisor::classify::ErrorPatterns;
use rsync_supervisor::supervisor::{
    OutputLineError, OutputSink, ProcessHandle, RunReport, Supervisor, SupervisorError,
};

/// Everything a run reported to its sink, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Process(Option<u32>),
    Error(String),
    Progress(usize),
    Completion(Option<Vec<String>>, String),
}

/// Sink that records every callback.
pub struct RecordingSink {
    pub executable: Option<PathBuf>,
    pub environment: Option<HashMap<String, String>>,
    patterns: ErrorPatterns,
    events: Mutex<Vec<Event>>,
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self {
            executable,
            environment: None,
            patterns: ErrorPatterns::with_default_rules(),
            events: Mutex::new(Vec::new()),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Sink resolving to `/bin/sh`.
    pub fn shell() -> Arc<Self> {
        Arc::new(Self::new(Some(PathBuf::from("/bin/sh"))))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Progress(count) => Some(count),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<(Option<Vec<String>>, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Completion(output, id) => Some((output, id)),
                _ => None,
            })
            .collect()
    }

    pub fn live_lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Wait until `line` has been streamed.
    pub async fn wait_for_line(&self, line: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.live_lines().iter().any(|l| l == line) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("line never arrived");
    }
}

impl OutputSink for RecordingSink {
    fn resolve_executable(&self) -> Option<PathBuf> {
        self.executable.clone()
    }

    fn check_line(&self, line: &str) -> Result<(), OutputLineError> {
        self.patterns.classify(line)
    }

    fn set_process(&self, process: Option<ProcessHandle>) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Process(process.map(|p| p.pid().unwrap_or(0))));
    }

    fn report_error(&self, error: SupervisorError) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(error.to_string()));
    }

    fn report_progress(&self, lines: usize) {
        self.events.lock().unwrap().push(Event::Progress(lines));
    }

    fn report_completion(&self, output: Option<Vec<String>>, correlation_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Completion(output, correlation_id.to_string()));
    }

    fn environment(&self) -> Option<HashMap<String, String>> {
        self.environment.clone()
    }

    fn live_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Arguments running `script` through `sh -c`, followed by `extra` positional args.
pub fn sh_args(script: &str, extra: &[&str]) -> Vec<String> {
    let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    args.extend(extra.iter().map(|s| (*s).to_string()));
    args
}

/// Write an executable shell script standing in for rsync.
pub fn fake_rsync(dir: &std::path::Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("rsync");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Launch, retrying while a freshly written script is still busy for exec.
pub async fn launch_script<F>(build: F) -> RunReport
where
    F: Fn() -> Supervisor,
{
    const ETXTBSY: i32 = 26;
    for _ in 0..20 {
        match build().launch() {
            Ok(handle) => {
                return tokio::time::timeout(Duration::from_secs(20), handle.wait())
                    .await
                    .expect("run timed out")
                    .expect("driver task failed");
            }
            Err(SupervisorError::ProcessLaunchFailed(e)) if e.raw_os_error() == Some(ETXTBSY) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("launch failed: {e}"),
        }
    }
    panic!("script stayed busy");
}

/// Launch and wait with a generous timeout.
pub async fn run_to_end(supervisor: Supervisor) -> RunReport {
    let handle = supervisor.launch().expect("launch failed");
    tokio::time::timeout(Duration::from_secs(20), handle.wait())
        .await
        .expect("run timed out")
        .expect("driver task failed")
}

/// Verify the public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use rsync_supervisor::supervisor::{
        BatchOutcome, LineMode, LinePolicy, LineSplitter, OutputBuffer, OverflowPolicy,
        ProcessCommand, RunFlags, RunState, RunStateMachine, TracingErrorLogger,
        DEFAULT_MAX_LINES,
    };

    let _ = OutputBuffer::new(DEFAULT_MAX_LINES, OverflowPolicy::default());
    let _ = LineSplitter::new();
    let _ = RunStateMachine::new();
    let flags = RunFlags::from_args(&["-a"]);
    let _ = LinePolicy::new(LineMode::Summary, flags, true, true);
    let _ = BatchOutcome::default();
    let _ = TracingErrorLogger;

    let _ = ProcessCommand::Terminate;
    let _ = RunState::Idle;
}
