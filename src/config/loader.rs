//! Locating, reading and checking the configuration file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use regex::Regex;

use super::Config;

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".rsync-supervisor.toml";

/// Environment variable naming a config file that takes priority over the defaults.
pub const CONFIG_ENV_VAR: &str = "RSYNC_SUPERVISOR_CONFIG";

/// Finds and loads `Config`, falling back to defaults when no file exists.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    candidates: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Search `$RSYNC_SUPERVISOR_CONFIG`, the working directory, then the
    /// user config directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_override(std::env::var_os(CONFIG_ENV_VAR))
    }

    fn with_override(env_path: Option<OsString>) -> Self {
        let mut candidates: Vec<PathBuf> = env_path
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .into_iter()
            .collect();
        candidates.push(PathBuf::from(LOCAL_CONFIG_FILE));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("rsync-supervisor").join("config.toml"));
        }
        Self { candidates }
    }

    /// Only consider `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            candidates: vec![path],
        }
    }

    /// Load and validate the first existing candidate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a file exists but cannot be read, parsed or
    /// fails validation.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let Some(path) = self.find_config_file() else {
            tracing::debug!(candidates = ?self.candidates, "No config file, using defaults");
            return Ok(Config::default());
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.clone(),
            source,
        })?;
        validate(&config).map_err(|reason| ConfigError::Invalid { path, reason })?;
        Ok(config)
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.candidates
    }

    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.candidates.iter().find(|p| p.is_file()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &Config) -> Result<(), String> {
    if config.supervisor.max_output_lines == 0 {
        return Err("supervisor.max_output_lines must be at least 1".to_string());
    }
    if config.capture.max_lines == Some(0) {
        return Err("capture.max_lines must be at least 1".to_string());
    }
    if config.capture.file.is_some() && !config.capture.enabled {
        tracing::warn!("capture.file is set but capture is disabled");
    }
    for pattern in &config.rsync.error_patterns {
        Regex::new(pattern).map_err(|e| format!("rsync.error_patterns: {e}"))?;
    }
    check_executable_path(config.rsync.path.as_deref())
}

fn check_executable_path(path: Option<&Path>) -> Result<(), String> {
    match path {
        Some(path) if path.as_os_str().is_empty() => {
            Err("rsync.path must not be empty".to_string())
        }
        _ => Ok(()),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}
