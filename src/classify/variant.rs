//! rsync flavour detection from `--version` output.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which rsync implementation produced the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsyncVariant {
    /// Samba rsync 3.x, which prints a trailing statistics block.
    #[default]
    Rsync3,
    /// openrsync, as shipped with recent macOS releases.
    OpenRsync,
}

const VERSION_PATTERN: &str = r"rsync\s+version\s+v?(\d+(?:\.\d+)*)";

impl RsyncVariant {
    /// Detect the flavour from version probe output.
    ///
    /// Returns `None` when the output does not look like rsync at all.
    #[must_use]
    pub fn detect(version_output: &str) -> Option<Self> {
        if version_output.contains("openrsync") {
            return Some(Self::OpenRsync);
        }
        let version = parse_version(version_output)?;
        let major: u32 = version.split('.').next()?.parse().ok()?;
        (major >= 3).then_some(Self::Rsync3)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsync3 => "rsync",
            Self::OpenRsync => "openrsync",
        }
    }
}

impl std::fmt::Display for RsyncVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the version number from rsync's `--version` banner.
#[must_use]
pub fn parse_version(version_output: &str) -> Option<String> {
    Regex::new(VERSION_PATTERN)
        .ok()?
        .captures(version_output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
