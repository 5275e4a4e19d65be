//! The environment being provisioned.
//!
//! [`Environment`] is the seam between the convergence engine and the
//! machine it mutates. The engine only ever probes tools and runs actions
//! through it; [`SystemEnvironment`] does both on the local host.

mod system;

use std::future::Future;

use semver::Version;

use crate::execute::{ExecuteError, StepOutput};
use crate::manifest::ToolSpec;
use crate::plan::Action;

pub use system::SystemEnvironment;

/// Result of probing for a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
  Absent,
  /// Present; `version` is `None` when it could not be determined.
  Present { version: Option<Version> },
}

impl Probe {
  pub fn is_present(&self) -> bool {
    matches!(self, Probe::Present { .. })
  }
}

/// A machine that tools can be probed on and installed into.
pub trait Environment: Send + Sync + 'static {
  /// Run one action to completion. Timeouts and retries are applied by the
  /// caller.
  fn run(&self, action: &Action) -> impl Future<Output = Result<StepOutput, ExecuteError>> + Send;

  /// Determine whether `tool` is present and in which version. Must not
  /// change the environment.
  fn probe(&self, tool: &ToolSpec) -> impl Future<Output = Result<Probe, ExecuteError>> + Send;
}
