//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::RsyncVariant;
use crate::supervisor::{OverflowPolicy, DEFAULT_MAX_LINES};

/// Tuning for a supervised run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Ceiling on retained output lines.
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
    /// What to do once the ceiling is reached.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Pause between process exit and the final drain, in milliseconds.
    #[serde(default = "default_pre_drain_delay_ms")]
    pub pre_drain_delay_ms: u64,
    /// How long the drain waits for straggling output, in milliseconds.
    #[serde(default = "default_drain_pause_ms")]
    pub drain_pause_ms: u64,
    /// Time between SIGTERM and SIGKILL on a graceful stop, in milliseconds.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
    /// Pass output lines to the host classifier.
    #[serde(default = "default_true")]
    pub check_errors: bool,
}

fn default_max_output_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_pre_drain_delay_ms() -> u64 {
    50
}

fn default_drain_pause_ms() -> u64 {
    10
}

fn default_terminate_grace_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_output_lines: default_max_output_lines(),
            overflow_policy: OverflowPolicy::default(),
            pre_drain_delay_ms: default_pre_drain_delay_ms(),
            drain_pause_ms: default_drain_pause_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
            check_errors: true,
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub fn pre_drain_delay(&self) -> Duration {
        Duration::from_millis(self.pre_drain_delay_ms)
    }

    #[must_use]
    pub fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }

    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Output capture store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Start with capture enabled.
    pub enabled: bool,
    /// Mirror captured lines to this file.
    pub file: Option<PathBuf>,
    /// Ceiling on lines kept in memory; unlimited when unset.
    pub max_lines: Option<usize>,
}

/// Where rsync lives and how to read its output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsyncConfig {
    /// Explicit executable; searched on `PATH` when unset.
    pub path: Option<PathBuf>,
    /// Output flavour; detected with a version probe when unset.
    pub variant: Option<RsyncVariant>,
    /// Extra regular expressions that mark an output line as an error.
    pub error_patterns: Vec<String>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub supervisor: SupervisorConfig,
    pub capture: CaptureConfig,
    pub rsync: RsyncConfig,
}
