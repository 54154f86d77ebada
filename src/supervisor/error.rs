//! Error types surfaced to the host.

use std::path::PathBuf;

/// A content failure recognised by the host's line classifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {line}")]
pub struct OutputLineError {
    /// The offending output line.
    pub line: String,
    /// Why the line was classified as an error.
    pub reason: String,
}

impl OutputLineError {
    /// Create a new classification error for `line`.
    #[must_use]
    pub fn new(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            reason: reason.into(),
        }
    }
}

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The host did not resolve an executable path.
    #[error("rsync executable not found")]
    ExecutableNotFound,
    /// The resolved path does not denote an executable file.
    #[error("Invalid executable path: {}", .0.display())]
    InvalidExecutablePath(PathBuf),
    /// The subprocess could not be started.
    #[error("Failed to launch process: {0}")]
    ProcessLaunchFailed(#[source] std::io::Error),
    /// A batch of output was not valid UTF-8.
    #[error("Process output could not be decoded as UTF-8")]
    OutputEncodingFailed,
    /// The host classifier flagged an output line.
    #[error("Error in process output: {0}")]
    OutputLine(#[from] OutputLineError),
    /// The merged output pipe could not be created or read.
    #[error("Output pipe error: {0}")]
    Pipe(#[source] std::io::Error),
    /// The background driver task was cancelled or panicked.
    #[error("Supervisor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SupervisorError {
    /// Whether the run could not start or its result was lost.
    ///
    /// Encoding, pipe and output-line errors are reported while the run
    /// continues, so they are not fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ExecutableNotFound
                | Self::InvalidExecutablePath(_)
                | Self::ProcessLaunchFailed(_)
                | Self::Join(_)
        )
    }
}
