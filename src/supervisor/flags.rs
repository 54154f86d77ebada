//! Run flags derived from the argument list.

use serde::{Deserialize, Serialize};

use crate::classify::RsyncVariant;

/// Arguments that request a trial run.
pub const DRY_RUN_FLAGS: [&str; 2] = ["--dry-run", "-n"];

/// Argument that requests the version string.
pub const VERSION_FLAG: &str = "--version";

/// Flags computed once from the argument list at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFlags {
    /// The run transfers data (no trial flag present).
    pub real_run: bool,
    /// The sole argument asks for the version string.
    pub version_probe: bool,
}

impl RunFlags {
    /// Scan `args` for the trial and version flags.
    #[must_use]
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let real_run = !args
            .iter()
            .any(|arg| DRY_RUN_FLAGS.contains(&arg.as_ref()));
        let version_probe = matches!(args, [only] if only.as_ref() == VERSION_FLAG);
        Self {
            real_run,
            version_probe,
        }
    }
}

/// How output lines are interpreted for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineMode {
    /// Lines are recorded only.
    VersionProbe,
    /// rsync 3.x: progress stops once the trailing summary starts on a real run;
    /// dry runs report after every batch.
    Summary,
    /// openrsync: progress after every batch.
    Streaming,
}

impl LineMode {
    /// Pick the line mode for a run.
    #[must_use]
    pub fn select(flags: RunFlags, variant: RsyncVariant) -> Self {
        if flags.version_probe {
            return Self::VersionProbe;
        }
        match variant {
            RsyncVariant::Rsync3 => Self::Summary,
            RsyncVariant::OpenRsync => Self::Streaming,
        }
    }
}
