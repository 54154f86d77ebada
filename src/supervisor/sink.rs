//! Host-facing hooks.
//!
//! The supervisor owns no policy of its own: where the executable lives,
//! which lines count as errors, and what to do with progress and results
//! are all decided by the host through [`OutputSink`].

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{OutputLineError, ProcessHandle, SupervisorError};

/// Number of trailing output lines included in error log records.
const ERROR_LOG_TAIL: usize = 20;

/// Callbacks a host implements to drive and observe a supervised run.
///
/// All methods are called from the run's driver task, one at a time.
pub trait OutputSink: Send + Sync {
    /// Absolute path of the rsync executable, or `None` if it cannot be found.
    fn resolve_executable(&self) -> Option<PathBuf>;

    /// Classify one output line.
    ///
    /// Called for each line until the first `Err`; later lines are not checked.
    ///
    /// # Errors
    ///
    /// Returns `OutputLineError` when the line reports a failure.
    fn check_line(&self, line: &str) -> Result<(), OutputLineError> {
        let _ = line;
        Ok(())
    }

    /// Receive the live process handle, or `None` when it goes away.
    fn set_process(&self, process: Option<ProcessHandle>);

    /// Receive a run error.
    fn report_error(&self, error: SupervisorError);

    /// Receive the cumulative number of output lines seen so far.
    fn report_progress(&self, lines: usize);

    /// Receive the final output (`None` if there was none) and the correlation id.
    fn report_completion(&self, output: Option<Vec<String>>, correlation_id: &str);

    /// Environment overrides applied to the subprocess.
    fn environment(&self) -> Option<HashMap<String, String>> {
        None
    }

    /// Receive each output line as it is decoded.
    fn live_line(&self, line: &str) {
        let _ = line;
    }
}

/// Collaborator that records the output of runs that reported errors.
#[async_trait]
pub trait ErrorLogger: Send + Sync {
    /// Record the full output of a failed run.
    async fn log_failed_run(&self, correlation_id: &str, output: &[String]);
}

/// [`ErrorLogger`] that emits a `tracing` warning with the tail of the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorLogger;

#[async_trait]
impl ErrorLogger for TracingErrorLogger {
    async fn log_failed_run(&self, correlation_id: &str, output: &[String]) {
        let skip = output.len().saturating_sub(ERROR_LOG_TAIL);
        let tail = output[skip..].join("\n");
        tracing::warn!(
            correlation_id = %correlation_id,
            lines = output.len(),
            tail = %tail,
            "rsync run reported errors"
        );
    }
}
