//! Error-line rules for rsync output.
//!
//! rsync reports most failures as plain text on stdout/stderr rather than
//! through its exit status alone. These rules recognise the common forms so
//! a host can plug them into [`OutputSink::check_line`](crate::supervisor::OutputSink::check_line).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::supervisor::OutputLineError;

/// Kind of failure an error rule recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// rsync's own error summary lines.
    Transfer,
    /// File access problems on either side.
    FileAccess,
    /// Network or remote shell failures.
    Connection,
    /// rsync daemon refusals.
    Daemon,
    /// Client and server could not agree on a protocol.
    Protocol,
    /// Host-supplied pattern.
    Custom,
}

/// Error type for pattern compilation.
#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A single error rule with category and pattern.
#[derive(Debug, Clone)]
pub struct ErrorRule {
    category: ErrorCategory,
    pattern: Regex,
    description: String,
}

impl ErrorRule {
    /// Create a new error rule.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` if the regex is invalid.
    pub fn new(
        category: ErrorCategory,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            category,
            pattern: Regex::new(pattern)?,
            description: description.into(),
        })
    }

    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Ordered collection of error rules.
#[derive(Debug, Clone, Default)]
pub struct ErrorPatterns {
    rules: Vec<ErrorRule>,
}

impl ErrorPatterns {
    #[must_use]
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Rules covering the messages rsync 3.x and openrsync print on failure.
    #[must_use]
    pub fn with_default_rules() -> Self {
        let rules = Self::default_rules()
            .into_iter()
            .filter_map(|result| match result {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to compile default error rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Default rules plus host-supplied patterns.
    ///
    /// # Errors
    ///
    /// Returns `PatternError::InvalidPattern` for the first pattern that does not compile.
    pub fn with_custom_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        let mut set = Self::with_default_rules();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            set.add_rule(ErrorRule::new(
                ErrorCategory::Custom,
                pattern,
                format!("matched custom pattern {pattern}"),
            )?);
        }
        Ok(set)
    }

    pub fn add_rule(&mut self, rule: ErrorRule) {
        self.rules.push(rule);
    }

    /// First rule matching `line`, if any.
    #[must_use]
    pub fn check(&self, line: &str) -> Option<&ErrorRule> {
        self.rules.iter().find(|rule| rule.matches(line))
    }

    /// Classify a line in the shape expected by an output sink.
    ///
    /// # Errors
    ///
    /// Returns `OutputLineError` describing the first matching rule.
    pub fn classify(&self, line: &str) -> Result<(), OutputLineError> {
        match self.check(line) {
            Some(rule) => Err(OutputLineError::new(line, rule.description())),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn rules(&self) -> &[ErrorRule] {
        &self.rules
    }

    fn default_rules() -> Vec<Result<ErrorRule, PatternError>> {
        vec![
            ErrorRule::new(
                ErrorCategory::Transfer,
                r"^rsync error:",
                "rsync reported an error",
            ),
            ErrorRule::new(
                ErrorCategory::Transfer,
                r"^rsync(\(\d+\))?: \[(sender|receiver|generator)\]",
                "rsync process reported a failure",
            ),
            ErrorRule::new(
                ErrorCategory::Transfer,
                r"^openrsync: error",
                "openrsync reported an error",
            ),
            ErrorRule::new(
                ErrorCategory::FileAccess,
                r"^(open)?rsync(\(\d+\))?: .*failed: ",
                "rsync file operation failed",
            ),
            ErrorRule::new(
                ErrorCategory::FileAccess,
                r"\(13\)$|Permission denied",
                "Permission denied",
            ),
            ErrorRule::new(
                ErrorCategory::FileAccess,
                r"No such file or directory",
                "No such file or directory",
            ),
            ErrorRule::new(
                ErrorCategory::Connection,
                r"(?i)connection (refused|unexpectedly closed|timed out|reset)",
                "Connection failure",
            ),
            ErrorRule::new(
                ErrorCategory::Connection,
                r"^ssh: ",
                "Remote shell failure",
            ),
            ErrorRule::new(
                ErrorCategory::Daemon,
                r"^@ERROR",
                "rsync daemon refused the request",
            ),
            ErrorRule::new(
                ErrorCategory::Protocol,
                r"(?i)protocol (version )?(mismatch|incompatibility)",
                "Protocol mismatch",
            ),
        ]
    }
}
