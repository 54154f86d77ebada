//! Per-batch line processing.
//!
//! Decides, for each batch of decoded lines, whether the trailing summary
//! has started, whether an error was reported, and whether progress should
//! be published.

use super::{LineMode, OutputLineError, RunFlags};

/// First line of the statistics block rsync 3.x prints after a transfer.
pub const SUMMARY_MARKER: &str = "Number of files";

/// Result of processing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Line count to report as progress, if progress should be published.
    pub progress: Option<usize>,
    /// The first classified error, when this batch latched one.
    pub error: Option<OutputLineError>,
    /// This batch started the summary block.
    pub summary_started: bool,
}

/// Latching line policy for a single run.
#[derive(Debug, Clone)]
pub struct LinePolicy {
    mode: LineMode,
    real_run: bool,
    report_progress: bool,
    check_errors: bool,
    summary_started: bool,
    error_discovered: bool,
}

impl LinePolicy {
    #[must_use]
    pub fn new(mode: LineMode, flags: RunFlags, report_progress: bool, check_errors: bool) -> Self {
        Self {
            mode,
            real_run: flags.real_run,
            report_progress,
            check_errors,
            summary_started: false,
            error_discovered: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> LineMode {
        self.mode
    }

    #[must_use]
    pub fn summary_started(&self) -> bool {
        self.summary_started
    }

    #[must_use]
    pub fn error_discovered(&self) -> bool {
        self.error_discovered
    }

    /// Process a batch of freshly appended lines.
    ///
    /// `total_lines` is the cumulative line count after the batch was
    /// appended. Progress is decided after the whole batch has been
    /// examined, so the batch that starts the summary does not report.
    pub fn process_batch<F>(
        &mut self,
        lines: &[String],
        total_lines: usize,
        mut classify: F,
    ) -> BatchOutcome
    where
        F: FnMut(&str) -> Result<(), OutputLineError>,
    {
        let mut outcome = BatchOutcome::default();

        match self.mode {
            LineMode::VersionProbe => return outcome,
            LineMode::Summary => {
                for line in lines {
                    if self.real_run && !self.summary_started && line.contains(SUMMARY_MARKER) {
                        tracing::debug!(line = %line, "Summary block started");
                        self.summary_started = true;
                        outcome.summary_started = true;
                    }
                    self.classify_line(line, &mut classify, &mut outcome);
                }
                // The summary only latches on real runs, so dry runs keep reporting.
                if self.report_progress && !self.summary_started {
                    outcome.progress = Some(total_lines);
                }
            }
            LineMode::Streaming => {
                for line in lines {
                    self.classify_line(line, &mut classify, &mut outcome);
                }
                if self.report_progress {
                    outcome.progress = Some(total_lines);
                }
            }
        }

        outcome
    }

    /// Run error detection only, as used after the process has exited.
    pub fn check_errors_only<F>(&mut self, lines: &[String], mut classify: F) -> Option<OutputLineError>
    where
        F: FnMut(&str) -> Result<(), OutputLineError>,
    {
        if self.mode == LineMode::VersionProbe {
            return None;
        }
        let mut outcome = BatchOutcome::default();
        for line in lines {
            self.classify_line(line, &mut classify, &mut outcome);
        }
        outcome.error
    }

    fn classify_line<F>(&mut self, line: &str, classify: &mut F, outcome: &mut BatchOutcome)
    where
        F: FnMut(&str) -> Result<(), OutputLineError>,
    {
        if !self.check_errors || self.error_discovered {
            return;
        }
        if let Err(error) = classify(line) {
            tracing::debug!(error = %error, "Error detected in output");
            self.error_discovered = true;
            outcome.error = Some(error);
        }
    }
}
