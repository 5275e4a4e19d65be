//! Types for action execution.
//!
//! This module defines the error types, result types, and configuration
//! for executing planned actions.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{DEFAULT_ACTION_TIMEOUT, DEFAULT_CONCURRENCY};
use crate::plan::Action;

use super::retry::RetryPolicy;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  /// Network trouble, timeouts: retried with backoff.
  Transient,
  /// Anything else: reported immediately.
  Fatal,
}

impl fmt::Display for FailureClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureClass::Transient => f.write_str("transient"),
      FailureClass::Fatal => f.write_str("fatal"),
    }
  }
}

/// Errors that can occur during action execution.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Command exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed {
    cmd: String,
    code: Option<i32>,
    /// Combined stdout and stderr.
    output: String,
    transient: bool,
  },

  /// Action did not finish within its timeout.
  #[error("timed out after {}: {cmd}", humantime::format_duration(*after))]
  Timeout { cmd: String, after: Duration },

  /// HTTP request failed during a download.
  #[error("fetch failed for {url}: {message}")]
  FetchFailed {
    url: String,
    message: String,
    transient: bool,
  },

  /// SHA256 hash mismatch after download.
  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  /// I/O error during execution.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The action itself is malformed. This is a programming error and is
  /// never retried.
  #[error("malformed action for {tool}: {message}")]
  MalformedAction { tool: String, message: String },

  /// A transient failure persisted through every retry.
  #[error("gave up after {attempts} attempts: {last}")]
  RetriesExhausted {
    attempts: u32,
    #[source]
    last: Box<ExecuteError>,
  },

  /// The run was cancelled while a transient failure waited for a retry.
  #[error("cancelled after {attempts} attempts: {last}")]
  Interrupted {
    attempts: u32,
    #[source]
    last: Box<ExecuteError>,
  },
}

impl ExecuteError {
  pub fn class(&self) -> FailureClass {
    match self {
      ExecuteError::CmdFailed { transient: true, .. }
      | ExecuteError::FetchFailed { transient: true, .. }
      | ExecuteError::Timeout { .. } => FailureClass::Transient,
      _ => FailureClass::Fatal,
    }
  }

  pub fn is_transient(&self) -> bool {
    self.class() == FailureClass::Transient
  }

  pub fn is_interrupted(&self) -> bool {
    matches!(self, ExecuteError::Interrupted { .. })
  }

  /// Captured command output, if the failure carries any.
  pub fn output(&self) -> Option<&str> {
    match self {
      ExecuteError::CmdFailed { output, .. } => Some(output),
      ExecuteError::RetriesExhausted { last, .. } | ExecuteError::Interrupted { last, .. } => last.output(),
      _ => None,
    }
  }
}

/// Output of a successful step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
  pub exit_code: Option<i32>,
  /// Combined stdout and stderr.
  pub output: String,
}

/// Record of one attempt at running an action.
#[derive(Debug, Clone)]
pub struct Attempt {
  /// 1-based attempt number.
  pub number: u32,
  pub exit_code: Option<i32>,
  pub output: String,
  pub duration: Duration,
  /// Error message when the attempt failed.
  pub error: Option<String>,
}

/// Result of executing a single action, retries included.
#[derive(Debug)]
pub struct ExecutionResult {
  pub action: Action,
  pub attempts: Vec<Attempt>,
  /// Wall time across all attempts and backoff.
  pub duration: Duration,
  /// Terminal failure, if the action did not succeed.
  pub failure: Option<ExecuteError>,
}

impl ExecutionResult {
  pub fn is_success(&self) -> bool {
    self.failure.is_none()
  }

  /// Whether cancellation stopped the action between retries.
  pub fn is_interrupted(&self) -> bool {
    self.failure.as_ref().is_some_and(ExecuteError::is_interrupted)
  }

  /// Number of retries performed (attempts beyond the first).
  pub fn retries(&self) -> u32 {
    (self.attempts.len() as u32).saturating_sub(1)
  }

  /// Exit status of the last attempt.
  pub fn exit_code(&self) -> Option<i32> {
    self.attempts.last().and_then(|a| a.exit_code)
  }

  /// Output captured by the last attempt.
  pub fn output(&self) -> &str {
    self.attempts.last().map(|a| a.output.as_str()).unwrap_or_default()
  }
}

/// Result of running a batch of actions.
#[derive(Debug, Default)]
pub struct RunReport {
  /// Finished actions, in completion order.
  pub results: Vec<ExecutionResult>,
  /// Actions skipped because a dependency failed: (tool, failed dependency).
  pub skipped: Vec<(String, String)>,
  /// Actions never started because the run stopped or was cancelled.
  pub not_started: Vec<String>,
  /// Whether cancellation was observed.
  pub cancelled: bool,
}

impl RunReport {
  /// Returns true if every action ran and succeeded.
  pub fn is_success(&self) -> bool {
    self.results.iter().all(ExecutionResult::is_success)
      && self.skipped.is_empty()
      && self.not_started.is_empty()
      && !self.cancelled
  }

  /// The first action that failed, in completion order. Actions stopped by
  /// cancellation do not count.
  pub fn first_failure(&self) -> Option<&ExecutionResult> {
    self.results.iter().find(|r| !r.is_success() && !r.is_interrupted())
  }

  pub fn succeeded(&self) -> impl Iterator<Item = &ExecutionResult> {
    self.results.iter().filter(|r| r.is_success())
  }
}

/// Configuration for action execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of actions running at once. 1 runs strictly in plan order.
  pub concurrency: usize,

  /// Retry policy for transient failures.
  pub retry: RetryPolicy,

  /// Timeout for actions without a per-tool timeout.
  pub timeout: Duration,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      concurrency: DEFAULT_CONCURRENCY,
      retry: RetryPolicy::default(),
      timeout: DEFAULT_ACTION_TIMEOUT,
    }
  }
}
