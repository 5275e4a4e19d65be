//! Convergence driver.
//!
//! Drives an environment to match a manifest:
//!
//! ```text
//! Init -> Verify -> Plan -> Execute -> Reverify -> Done
//!                    ^                     |
//!                    +------- Retry <------+
//! ```
//!
//! An action failure ends the run in `Fatal`. A mismatch that survives
//! `max_cycles` execute cycles is escalated to `Fatal` as well. Cancellation
//! ends the run in `Cancelled` once running actions have finished.

mod options;
mod report;

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::env_lock::{EnvLock, EnvLockError, LockMode};
use crate::environment::Environment;
use crate::execute::{ExecuteError, Executor, RunReport};
use crate::manifest::{DependencyGraph, Manifest, ValidationError};
use crate::plan::{PlanError, plan};
use crate::platform::paths::default_lock_path;
use crate::util::CancelSignal;
use crate::verify::{ToolStatus, VerifyReport, verify};

pub use options::{ConvergeOptions, ManifestSource};
pub use report::{ConvergeReport, FatalKind, FatalReport, Outcome, Phase};

/// Errors that stop a run before it reaches a terminal phase.
#[derive(Debug, Error)]
pub enum ConvergeError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Lock(#[from] EnvLockError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),
}

impl ConvergeError {
  /// Process exit code for this error.
  pub fn exit_code(&self) -> u8 {
    match self {
      ConvergeError::Validation(_) | ConvergeError::Plan(_) => 2,
      ConvergeError::Lock(_) | ConvergeError::Execute(_) => 1,
    }
  }
}

/// Runs the convergence state machine against one environment.
pub struct Driver<E> {
  env: Arc<E>,
  options: ConvergeOptions,
  cancel: CancelSignal,
}

impl<E: Environment> Driver<E> {
  pub fn new(env: Arc<E>, options: ConvergeOptions) -> Self {
    Self {
      env,
      options,
      cancel: CancelSignal::new(),
    }
  }

  /// Use `cancel` to stop the run from outside.
  pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_signal(&self) -> &CancelSignal {
    &self.cancel
  }

  /// Converge the environment to `manifest`.
  ///
  /// `label` names the manifest in the lock file. Terminal outcomes,
  /// including `Fatal`, are returned as `Ok`; `Err` means the run could not
  /// start or the manifest is invalid.
  pub async fn run(&self, manifest: &Manifest, label: &str) -> Result<ConvergeReport, ConvergeError> {
    let mut run = Run::new(manifest, self.options.dry_run);
    run.enter(Phase::Init);

    manifest.validate()?;
    let graph = DependencyGraph::build(manifest)?;

    let lock_path = self.options.lock_path.clone().unwrap_or_else(default_lock_path);
    let mode = if self.options.dry_run {
      LockMode::Shared
    } else {
      LockMode::Exclusive
    };
    let _lock = EnvLock::acquire(&lock_path, mode, &self.options.command, label)?;

    let config = self.options.execute_config(&manifest.settings);
    let max_cycles = self.options.max_cycles(&manifest.settings);
    let executor = Executor::new(Arc::clone(&self.env), config);

    info!(
      tools = manifest.len(),
      dry_run = self.options.dry_run,
      max_cycles,
      base_image = manifest.base_image.as_deref().unwrap_or("-"),
      "starting convergence"
    );

    if self.cancel.is_cancelled() {
      return Ok(run.finish(Outcome::Cancelled));
    }

    run.enter(Phase::Verify);
    run.initial = verify(manifest, &*self.env).await;
    run.last = run.initial.clone();

    loop {
      if self.cancel.is_cancelled() {
        return Ok(run.finish(Outcome::Cancelled));
      }

      run.enter(Phase::Plan);
      let plan = plan(manifest, &run.last)?;

      if plan.is_empty() {
        return Ok(run.finish(Outcome::Done));
      }

      run.plans.push(plan.clone());

      if self.options.dry_run {
        info!(actions = plan.len(), "dry run, not executing");
        return Ok(run.finish(Outcome::Done));
      }

      run.cycles += 1;
      run.enter(Phase::Execute);
      let executed = executor.run(&plan.actions, &self.cancel).await?;

      if let Some(fatal) = execution_failure(&executed, &graph, manifest) {
        run.results.extend(executed.results);
        return Ok(run.finish(Outcome::Fatal(fatal)));
      }
      // A cancel that lands while the last action runs still ends the run.
      let cancelled = executed.cancelled || self.cancel.is_cancelled();
      run.results.extend(executed.results);
      if cancelled {
        return Ok(run.finish(Outcome::Cancelled));
      }

      run.enter(Phase::Reverify);
      run.last = verify(manifest, &*self.env).await;

      if run.last.is_satisfied() {
        return Ok(run.finish(Outcome::Done));
      }

      if run.cycles >= max_cycles {
        let fatal = mismatch_failure(&run, &graph, manifest);
        return Ok(run.finish(Outcome::Fatal(fatal)));
      }

      warn!(
        cycle = run.cycles,
        drift = run.last.drift(),
        "environment still drifts after execute, retrying"
      );
      run.enter(Phase::Retry);
    }
  }
}

/// Mutable state of one run.
struct Run {
  dry_run: bool,
  base_image: Option<String>,
  cycles: u32,
  initial: VerifyReport,
  last: VerifyReport,
  plans: Vec<crate::plan::Plan>,
  results: Vec<crate::execute::ExecutionResult>,
  transitions: Vec<Phase>,
}

impl Run {
  fn new(manifest: &Manifest, dry_run: bool) -> Self {
    Self {
      dry_run,
      base_image: manifest.base_image.clone(),
      cycles: 0,
      initial: VerifyReport::default(),
      last: VerifyReport::default(),
      plans: Vec::new(),
      results: Vec::new(),
      transitions: Vec::new(),
    }
  }

  fn enter(&mut self, phase: Phase) {
    info!(phase = %phase, "entering phase");
    self.transitions.push(phase);
  }

  fn finish(mut self, outcome: Outcome) -> ConvergeReport {
    match &outcome {
      Outcome::Done => info!(cycles = self.cycles, actions = self.results.len(), "converged"),
      Outcome::Fatal(fatal) => error!(tool = %fatal.tool, cause = %fatal.cause, "convergence failed"),
      Outcome::Cancelled => warn!("convergence cancelled"),
    }
    self.enter(outcome.phase());
    ConvergeReport {
      outcome,
      dry_run: self.dry_run,
      base_image: self.base_image,
      cycles: self.cycles,
      initial: self.initial,
      last: self.last,
      plans: self.plans,
      results: self.results,
      transitions: self.transitions,
    }
  }
}

/// Names of `tool`'s transitive dependencies and `tool`, in install order.
fn chain_for(graph: &DependencyGraph, manifest: &Manifest, tool: &str) -> Vec<String> {
  match manifest.position(tool) {
    Some(idx) => graph
      .chain_to(idx)
      .into_iter()
      .map(|i| graph.name(i).to_string())
      .collect(),
    None => vec![tool.to_string()],
  }
}

fn execution_failure(executed: &RunReport, graph: &DependencyGraph, manifest: &Manifest) -> Option<FatalReport> {
  let blocked: Vec<String> = executed
    .skipped
    .iter()
    .map(|(tool, _)| tool.clone())
    .chain(executed.not_started.iter().cloned())
    .collect();

  if let Some(failed) = executed.first_failure() {
    let cause = failed
      .failure
      .as_ref()
      .map(ToString::to_string)
      .unwrap_or_else(|| "action failed".to_string());
    return Some(FatalReport {
      kind: FatalKind::Execution,
      tool: failed.action.tool.clone(),
      action: Some(failed.action.to_string()),
      command: Some(failed.action.command_line()),
      cause,
      output: failed.output().to_string(),
      chain: chain_for(graph, manifest, &failed.action.tool),
      blocked,
    });
  }

  // Work left undone without a recorded failure or cancellation means an
  // action task died.
  if !executed.cancelled && !blocked.is_empty() {
    let tool = blocked[0].clone();
    return Some(FatalReport {
      kind: FatalKind::Execution,
      chain: chain_for(graph, manifest, &tool),
      tool,
      action: None,
      command: None,
      cause: "action did not run to completion".to_string(),
      output: String::new(),
      blocked,
    });
  }

  None
}

fn mismatch_failure(run: &Run, graph: &DependencyGraph, manifest: &Manifest) -> FatalReport {
  let unsatisfied = run.last.tools.iter().find(|t| !t.status.is_satisfied());
  let (tool, status) = match unsatisfied {
    Some(check) => (check.name.clone(), describe_status(&check.status)),
    None => (String::new(), "unknown".to_string()),
  };

  let last_result = run.results.iter().rev().find(|r| r.action.tool == tool);

  FatalReport {
    kind: FatalKind::VerificationMismatch,
    action: last_result.map(|r| r.action.to_string()),
    command: last_result.map(|r| r.action.command_line()),
    cause: format!(
      "{tool} is still {status} after {} cycle{}",
      run.cycles,
      if run.cycles == 1 { "" } else { "s" }
    ),
    output: last_result.map(|r| r.output().to_string()).unwrap_or_default(),
    chain: chain_for(graph, manifest, &tool),
    blocked: run
      .last
      .tools
      .iter()
      .filter(|t| !t.status.is_satisfied() && t.name != tool)
      .map(|t| t.name.clone())
      .collect(),
    tool,
  }
}

fn describe_status(status: &ToolStatus) -> String {
  match status {
    ToolStatus::Satisfied { .. } => "satisfied".to_string(),
    ToolStatus::Missing => "missing".to_string(),
    ToolStatus::Mismatched { found: Some(found), wanted } => format!("at {found} (wanted {wanted})"),
    ToolStatus::Mismatched { found: None, wanted } => format!("at an unknown version (wanted {wanted})"),
  }
}
