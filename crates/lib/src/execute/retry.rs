//! Retry policy for transient failures.

use std::time::Duration;

use crate::consts::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_RETRIES};

/// How many times a transiently failing action is retried, and how long to
/// wait between attempts.
///
/// The delay doubles with every retry, starting at `base_delay` and never
/// exceeding `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  pub fn new(max_retries: u32) -> Self {
    Self {
      max_retries,
      ..Default::default()
    }
  }

  /// Policy without waits between attempts, for tests.
  pub fn immediate(max_retries: u32) -> Self {
    Self {
      max_retries,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
    }
  }

  /// Whether another retry is allowed after `retries` retries have been made.
  pub fn should_retry(&self, retries: u32) -> bool {
    retries < self.max_retries
  }

  /// Delay before retry number `retry` (0 is the first retry).
  pub fn delay(&self, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Total attempts allowed, the first one included.
  pub fn max_attempts(&self) -> u32 {
    self.max_retries.saturating_add(1)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: DEFAULT_MAX_RETRIES,
      base_delay: DEFAULT_BACKOFF_BASE,
      max_delay: DEFAULT_BACKOFF_CAP,
    }
  }
}
