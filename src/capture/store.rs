//! Shared output capture store.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::config::CaptureConfig;

/// Default capacity for the live line broadcast channel.
pub const DEFAULT_LIVE_CHANNEL_CAPACITY: usize = 256;

/// Errors from capture store operations.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// The mirror file could not be opened.
    #[error("Failed to open capture file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Exporting the captured lines failed.
    #[error("Failed to export capture to {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
struct FileMirror {
    path: PathBuf,
    file: File,
}

#[derive(Debug, Default)]
struct CaptureState {
    enabled: bool,
    lines: VecDeque<String>,
    max_lines: Option<usize>,
    mirror: Option<FileMirror>,
}

/// Process-wide store that mirrors output lines from any number of runs.
///
/// Construct one at start-up and hand clones to each
/// [`Supervisor`](crate::supervisor::Supervisor). Writers are serialized
/// internally, so a record is never interleaved with another.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    state: Arc<Mutex<CaptureState>>,
    live: broadcast::Sender<String>,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputCapture {
    /// Create a disabled store with no in-memory ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::from_state(CaptureState::default())
    }

    /// Create a store keeping at most `max_lines` lines in memory.
    #[must_use]
    pub fn with_max_lines(max_lines: usize) -> Self {
        Self::from_state(CaptureState {
            max_lines: Some(max_lines.max(1)),
            ..CaptureState::default()
        })
    }

    fn from_state(state: CaptureState) -> Self {
        let (live, _) = broadcast::channel(DEFAULT_LIVE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(state)),
            live,
        }
    }

    /// Build a store from configuration, enabling it if requested.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::OpenFile` if the configured mirror file cannot be opened.
    pub async fn from_config(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let capture = match config.max_lines {
            Some(max) => Self::with_max_lines(max),
            None => Self::new(),
        };
        if config.enabled {
            capture.enable(config.file.clone()).await?;
        }
        Ok(capture)
    }

    /// Start capturing, optionally mirroring to `file`.
    ///
    /// Enabling an enabled store keeps its lines; passing a different file
    /// switches the mirror.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::OpenFile` if the mirror file cannot be opened.
    /// The store is left unchanged in that case.
    pub async fn enable(&self, file: Option<PathBuf>) -> Result<(), CaptureError> {
        let mut state = self.state.lock().await;

        let same_mirror = match (&state.mirror, &file) {
            (Some(mirror), Some(path)) => mirror.path == *path,
            (None, None) => true,
            _ => false,
        };
        if !same_mirror {
            state.mirror = match file {
                Some(path) => Some(open_mirror(path).await?),
                None => None,
            };
        }

        if !state.enabled {
            tracing::info!(
                file = ?state.mirror.as_ref().map(|m| m.path.display().to_string()),
                "Output capture enabled"
            );
        }
        state.enabled = true;
        Ok(())
    }

    /// Stop capturing and close the mirror file. Captured lines are kept.
    pub async fn disable(&self) {
        let mut state = self.state.lock().await;
        if state.enabled {
            tracing::info!("Output capture disabled");
        }
        state.enabled = false;
        state.mirror = None;
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Record one line. Does nothing while disabled.
    pub async fn capture_line(&self, line: &str) {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return;
        }

        if let Some(max) = state.max_lines {
            while state.lines.len() >= max {
                state.lines.pop_front();
            }
        }
        state.lines.push_back(line.to_string());
        let _ = self.live.send(line.to_string());

        let failed = match state.mirror.as_mut() {
            Some(mirror) => write_record(&mut mirror.file, line).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            if let Some(mirror) = state.mirror.take() {
                tracing::warn!(
                    path = %mirror.path.display(),
                    error = %e,
                    "Capture file write failed, mirroring stopped"
                );
            }
        }
    }

    /// Snapshot of every captured line.
    pub async fn all_lines(&self) -> Vec<String> {
        self.state.lock().await.lines.iter().cloned().collect()
    }

    /// Snapshot of the most recent `n` lines, oldest first.
    pub async fn recent_lines(&self, n: usize) -> Vec<String> {
        let state = self.state.lock().await;
        let skip = state.lines.len().saturating_sub(n);
        state.lines.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.lines.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.lines.is_empty()
    }

    /// Drop captured lines. The mirror file is not truncated.
    pub async fn clear(&self) {
        self.state.lock().await.lines.clear();
    }

    /// Stream of lines captured from now on.
    ///
    /// Slow subscribers skip lines they fell behind on.
    #[must_use]
    pub fn subscribe(&self) -> impl Stream<Item = String> + Send + 'static {
        BroadcastStream::new(self.live.subscribe()).filter_map(Result::ok)
    }

    /// Write every captured line to `path`, one per line.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Export` if the file cannot be written.
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<usize, CaptureError> {
        let path = path.as_ref();
        let lines = self.all_lines().await;
        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| CaptureError::Export {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(lines.len())
    }
}

async fn open_mirror(path: PathBuf) -> Result<FileMirror, CaptureError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|source| CaptureError::OpenFile {
            path: path.clone(),
            source,
        })?;
    Ok(FileMirror { path, file })
}

async fn write_record(file: &mut File, line: &str) -> std::io::Result<()> {
    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');
    file.write_all(record.as_bytes()).await?;
    file.flush().await
}
