//! Accumulated output and byte-to-line splitting.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::SupervisorError;

/// Default ceiling for retained output lines.
pub const DEFAULT_MAX_LINES: usize = 100_000;

/// What happens when the output ceiling is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest line to make room.
    #[default]
    DropOldest,
    /// Keep the existing lines and discard the new one.
    RejectNew,
}

/// Ordered, bounded store of decoded output lines.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    policy: OverflowPolicy,
    total: usize,
    evicted: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, OverflowPolicy::default())
    }
}

impl OutputBuffer {
    /// Create a buffer holding at most `max_lines` lines.
    ///
    /// A ceiling of zero is treated as one.
    #[must_use]
    pub fn new(max_lines: usize, policy: OverflowPolicy) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
            policy,
            total: 0,
            evicted: 0,
        }
    }

    /// Append a line, applying the overflow policy.
    ///
    /// Returns `false` when the line was rejected.
    pub fn push(&mut self, line: String) -> bool {
        self.total = self.total.saturating_add(1);
        if self.lines.len() >= self.max_lines {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    self.lines.pop_front();
                }
                OverflowPolicy::RejectNew => {
                    self.evicted = self.evicted.saturating_add(1);
                    return false;
                }
            }
            self.evicted = self.evicted.saturating_add(1);
        }
        self.lines.push_back(line);
        true
    }

    /// Number of lines currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether no lines are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines observed since the run started, including discarded ones.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Lines dropped or rejected by the ceiling.
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    /// Consume the buffer, returning the retained lines in order.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Turns raw pipe reads into complete text lines.
///
/// Bytes after the last newline are held back until more data arrives
/// or [`LineSplitter::finish`] is called.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the complete lines it finishes.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::OutputEncodingFailed` when the completed
    /// lines are not valid UTF-8. Those bytes are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, SupervisorError> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        let text = String::from_utf8(complete).map_err(|_| SupervisorError::OutputEncodingFailed)?;
        Ok(split_lines(&text))
    }

    /// Flush the unterminated tail, if any.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::OutputEncodingFailed` when the tail is not valid UTF-8.
    pub fn finish(&mut self) -> Result<Option<String>, SupervisorError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let tail = std::mem::take(&mut self.pending);
        let text = String::from_utf8(tail).map_err(|_| SupervisorError::OutputEncodingFailed)?;
        let line = text.strip_suffix('\r').unwrap_or(&text);
        Ok(Some(line.to_string()))
    }

    /// Whether bytes are waiting for a newline.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split_terminator('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}
