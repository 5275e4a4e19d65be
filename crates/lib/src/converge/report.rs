use std::fmt;

use serde::Serialize;

use crate::execute::ExecutionResult;
use crate::plan::Plan;
use crate::verify::VerifyReport;

/// Driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
  Init,
  Verify,
  Plan,
  Execute,
  /// Verification after an execute cycle.
  Reverify,
  Retry,
  Done,
  Fatal,
  Cancelled,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Phase::Init => "init",
      Phase::Verify => "verify",
      Phase::Plan => "plan",
      Phase::Execute => "execute",
      Phase::Reverify => "reverify",
      Phase::Retry => "retry",
      Phase::Done => "done",
      Phase::Fatal => "fatal",
      Phase::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Phase::Done | Phase::Fatal | Phase::Cancelled)
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FatalKind {
  /// An action failed and could not be retried further.
  Execution,
  /// Actions succeeded but the environment still does not match after the
  /// cycle budget.
  VerificationMismatch,
}

/// Why a run ended in [`Phase::Fatal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalReport {
  pub kind: FatalKind,
  pub tool: String,
  /// The failing step, e.g. `install node (run-script)`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub action: Option<String>,
  /// Command line of the failing step.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub command: Option<String>,
  pub cause: String,
  /// Output captured from the last attempt.
  pub output: String,
  /// Dependencies of the failing tool followed by the tool itself, in
  /// install order.
  pub chain: Vec<String>,
  /// Planned tools that were skipped or never started.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub blocked: Vec<String>,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
  Done,
  Fatal(FatalReport),
  Cancelled,
}

impl Outcome {
  pub fn phase(&self) -> Phase {
    match self {
      Outcome::Done => Phase::Done,
      Outcome::Fatal(_) => Phase::Fatal,
      Outcome::Cancelled => Phase::Cancelled,
    }
  }

  pub fn exit_code(&self) -> u8 {
    match self {
      Outcome::Done => 0,
      Outcome::Fatal(_) => 1,
      Outcome::Cancelled => 130,
    }
  }
}

/// Everything a run did.
#[derive(Debug)]
pub struct ConvergeReport {
  pub outcome: Outcome,
  pub dry_run: bool,
  pub base_image: Option<String>,
  /// Execute cycles performed.
  pub cycles: u32,
  /// Environment state before any action ran.
  pub initial: VerifyReport,
  /// Environment state at the end of the run.
  pub last: VerifyReport,
  /// Non-empty plans, one per cycle. A dry run records exactly one.
  pub plans: Vec<Plan>,
  /// Executed actions across all cycles, in completion order.
  pub results: Vec<ExecutionResult>,
  /// Every phase entered, ending with the terminal one.
  pub transitions: Vec<Phase>,
}

impl ConvergeReport {
  pub fn is_done(&self) -> bool {
    self.outcome == Outcome::Done
  }

  pub fn exit_code(&self) -> u8 {
    self.outcome.exit_code()
  }

  pub fn fatal(&self) -> Option<&FatalReport> {
    match &self.outcome {
      Outcome::Fatal(report) => Some(report),
      _ => None,
    }
  }

  /// Total actions executed, retries not counted.
  pub fn actions_run(&self) -> usize {
    self.results.len()
  }
}
