use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use crate::consts::{
  APP_NAME, DEFAULT_ACTION_TIMEOUT, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_CONCURRENCY, DEFAULT_MAX_CYCLES,
  DEFAULT_MAX_RETRIES,
};
use crate::execute::{ExecuteConfig, RetryPolicy};
use crate::manifest::{Manifest, Settings, ValidationError};

/// Options for a convergence run.
///
/// `None` fields fall back to the manifest's `[settings]`, then to the
/// built-in defaults.
#[derive(Debug, Clone)]
pub struct ConvergeOptions {
  /// Compute and report the plan without executing it.
  pub dry_run: bool,
  pub concurrency: Option<usize>,
  pub max_retries: Option<u32>,
  pub max_cycles: Option<u32>,
  /// Default per-action timeout.
  pub timeout: Option<Duration>,
  pub backoff_base: Duration,
  pub backoff_cap: Duration,
  /// Lock file path. Defaults to [`crate::platform::paths::default_lock_path`].
  pub lock_path: Option<PathBuf>,
  /// Recorded in the lock file so contending runs can name the holder.
  pub command: String,
}

impl Default for ConvergeOptions {
  fn default() -> Self {
    Self {
      dry_run: false,
      concurrency: None,
      max_retries: None,
      max_cycles: None,
      timeout: None,
      backoff_base: DEFAULT_BACKOFF_BASE,
      backoff_cap: DEFAULT_BACKOFF_CAP,
      lock_path: None,
      command: APP_NAME.to_string(),
    }
  }
}

impl ConvergeOptions {
  pub fn concurrency(&self, settings: &Settings) -> usize {
    self
      .concurrency
      .or(settings.concurrency)
      .unwrap_or(DEFAULT_CONCURRENCY)
      .max(1)
  }

  pub fn max_retries(&self, settings: &Settings) -> u32 {
    self.max_retries.or(settings.max_retries).unwrap_or(DEFAULT_MAX_RETRIES)
  }

  /// Execute cycles allowed before a persistent mismatch is fatal. At least 1.
  pub fn max_cycles(&self, settings: &Settings) -> u32 {
    self.max_cycles.or(settings.max_cycles).unwrap_or(DEFAULT_MAX_CYCLES).max(1)
  }

  pub fn timeout(&self, settings: &Settings) -> Duration {
    self.timeout.or(settings.timeout).unwrap_or(DEFAULT_ACTION_TIMEOUT)
  }

  pub fn execute_config(&self, settings: &Settings) -> ExecuteConfig {
    ExecuteConfig {
      concurrency: self.concurrency(settings),
      retry: RetryPolicy {
        max_retries: self.max_retries(settings),
        base_delay: self.backoff_base,
        max_delay: self.backoff_cap,
      },
      timeout: self.timeout(settings),
    }
  }
}

/// Where the manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
  Path(PathBuf),
  Stdin,
}

impl ManifestSource {
  /// `-` means stdin.
  pub fn parse(arg: &str) -> Self {
    if arg == "-" {
      ManifestSource::Stdin
    } else {
      ManifestSource::Path(PathBuf::from(arg))
    }
  }

  pub fn load(&self) -> Result<Manifest, ValidationError> {
    match self {
      ManifestSource::Path(path) => Manifest::from_path(path),
      ManifestSource::Stdin => {
        let stdin = std::io::stdin();
        if stdin.is_terminal() {
          tracing::warn!("reading manifest from a terminal; end input with Ctrl-D");
        }
        Manifest::from_reader(stdin.lock())
      }
    }
  }

  /// Short description for logs and the lock file.
  pub fn label(&self) -> String {
    match self {
      ManifestSource::Path(path) => path.display().to_string(),
      ManifestSource::Stdin => "-".to_string(),
    }
  }
}
