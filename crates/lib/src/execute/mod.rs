//! Action execution module.
//!
//! This module runs planned actions against an [`Environment`]. It handles:
//! - Per-action timeouts
//! - Retrying transient failures with exponential backoff
//! - Sequential execution in plan order, or a bounded worker pool where each
//!   action waits for the actions it depends on
//! - Skip tracking when a dependency fails, and stopping on cancellation

pub mod actions;
pub mod retry;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::environment::Environment;
use crate::plan::Action;
use crate::util::CancelSignal;

pub use retry::RetryPolicy;
pub use types::{
  Attempt, ExecuteConfig, ExecuteError, ExecutionResult, FailureClass, RunReport, StepOutput,
};

/// Runs actions against an environment.
pub struct Executor<E> {
  env: Arc<E>,
  config: ExecuteConfig,
}

impl<E> Clone for Executor<E> {
  fn clone(&self) -> Self {
    Self {
      env: Arc::clone(&self.env),
      config: self.config.clone(),
    }
  }
}

impl<E: Environment> Executor<E> {
  pub fn new(env: Arc<E>, config: ExecuteConfig) -> Self {
    Self { env, config }
  }

  pub fn config(&self) -> &ExecuteConfig {
    &self.config
  }

  /// Execute a single action, retrying transient failures.
  ///
  /// Failures of the action are reported in the returned
  /// [`ExecutionResult`]. `Err` is returned only when the action is
  /// malformed, in which case nothing is run. Once `cancel` fires no retry
  /// is started and the action ends as [`ExecuteError::Interrupted`].
  pub async fn execute(&self, action: &Action, cancel: &CancelSignal) -> Result<ExecutionResult, ExecuteError> {
    action.validate().map_err(|message| ExecuteError::MalformedAction {
      tool: action.tool.clone(),
      message,
    })?;

    let timeout = action.timeout.unwrap_or(self.config.timeout);
    let policy = self.config.retry;
    let started = Instant::now();
    let mut attempts: Vec<Attempt> = Vec::new();

    loop {
      let number = attempts.len() as u32 + 1;
      let attempt_started = Instant::now();
      debug!(tool = %action.tool, attempt = number, "running action");

      let outcome = match tokio::time::timeout(timeout, self.env.run(action)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ExecuteError::Timeout {
          cmd: action.command_line(),
          after: timeout,
        }),
      };
      let elapsed = attempt_started.elapsed();

      let err = match outcome {
        Ok(out) => {
          info!(tool = %action.tool, attempt = number, elapsed = ?elapsed, "action succeeded");
          attempts.push(Attempt {
            number,
            exit_code: out.exit_code,
            output: out.output,
            duration: elapsed,
            error: None,
          });
          return Ok(ExecutionResult {
            action: action.clone(),
            attempts,
            duration: started.elapsed(),
            failure: None,
          });
        }
        Err(err) => err,
      };

      attempts.push(Attempt {
        number,
        exit_code: match &err {
          ExecuteError::CmdFailed { code, .. } => *code,
          _ => None,
        },
        output: err.output().unwrap_or_default().to_string(),
        duration: elapsed,
        error: Some(err.to_string()),
      });

      if !err.is_transient() {
        error!(tool = %action.tool, attempt = number, error = %err, "action failed");
        return Ok(self.failed(action, attempts, started, err));
      }

      let retries = number - 1;
      if !policy.should_retry(retries) {
        error!(tool = %action.tool, attempts = number, error = %err, "retries exhausted");
        let err = ExecuteError::RetriesExhausted {
          attempts: number,
          last: Box::new(err),
        };
        return Ok(self.failed(action, attempts, started, err));
      }

      let delay = policy.delay(retries);
      warn!(
        tool = %action.tool,
        attempt = number,
        retry_in = %humantime::format_duration(delay),
        error = %err,
        "transient failure, retrying"
      );

      let interrupted = cancel.is_cancelled()
        || tokio::select! {
          _ = tokio::time::sleep(delay) => false,
          _ = cancel.cancelled() => true,
        };
      if interrupted {
        warn!(tool = %action.tool, attempts = number, "cancelled, not retrying");
        let err = ExecuteError::Interrupted {
          attempts: number,
          last: Box::new(err),
        };
        return Ok(self.failed(action, attempts, started, err));
      }
    }
  }

  fn failed(&self, action: &Action, attempts: Vec<Attempt>, started: Instant, err: ExecuteError) -> ExecutionResult {
    ExecutionResult {
      action: action.clone(),
      attempts,
      duration: started.elapsed(),
      failure: Some(err),
    }
  }

  /// Run `actions` in plan order.
  ///
  /// With a concurrency of 1 actions run one after another. Otherwise up to
  /// `concurrency` actions run at once, each starting only after every
  /// action it waits for has succeeded. A failed dependency marks its
  /// dependents skipped. After the first failure, or once `cancel` fires,
  /// no new action starts; running actions finish.
  ///
  /// Every action is validated before anything runs, so a malformed action
  /// leaves the environment untouched.
  pub async fn run(&self, actions: &[Action], cancel: &CancelSignal) -> Result<RunReport, ExecuteError> {
    for action in actions {
      action.validate().map_err(|message| ExecuteError::MalformedAction {
        tool: action.tool.clone(),
        message,
      })?;
    }

    info!(
      actions = actions.len(),
      concurrency = self.config.concurrency,
      "starting execution"
    );

    let report = if self.config.concurrency <= 1 {
      self.run_sequential(actions, cancel).await?
    } else {
      self.run_pool(actions, cancel).await
    };

    info!(
      succeeded = report.succeeded().count(),
      failed = report.results.len() - report.succeeded().count(),
      skipped = report.skipped.len(),
      not_started = report.not_started.len(),
      cancelled = report.cancelled,
      "execution complete"
    );

    Ok(report)
  }

  async fn run_sequential(&self, actions: &[Action], cancel: &CancelSignal) -> Result<RunReport, ExecuteError> {
    let mut report = RunReport::default();

    for (idx, action) in actions.iter().enumerate() {
      if cancel.is_cancelled() {
        warn!(tool = %action.tool, "cancelled, not starting remaining actions");
        report.cancelled = true;
        report.not_started = remaining(&actions[idx..]);
        break;
      }

      let result = self.execute(action, cancel).await?;
      let ok = result.is_success();
      report.cancelled |= result.is_interrupted();
      report.results.push(result);

      if !ok {
        report.not_started = remaining(&actions[idx + 1..]);
        break;
      }
    }

    Ok(report)
  }

  async fn run_pool(&self, actions: &[Action], cancel: &CancelSignal) -> RunReport {
    let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
    let stop = Arc::new(AtomicBool::new(false));

    // One completion barrier per action.
    let channels: Vec<_> = actions.iter().map(|_| watch::channel(NodeState::Pending)).collect();
    let index: HashMap<&str, usize> = actions.iter().enumerate().map(|(i, a)| (a.tool.as_str(), i)).collect();
    let receivers: Vec<watch::Receiver<NodeState>> = channels.iter().map(|(_, rx)| rx.clone()).collect();

    let mut join_set = JoinSet::new();

    for (idx, (action, (tx, _))) in actions.iter().zip(channels).enumerate() {
      let deps: Vec<(String, watch::Receiver<NodeState>)> = action
        .wait_for
        .iter()
        .filter_map(|dep| index.get(dep.as_str()).map(|&i| (dep.clone(), receivers[i].clone())))
        .collect();

      let task = PoolTask {
        executor: self.clone(),
        action: action.clone(),
        deps,
        done: tx,
        semaphore: Arc::clone(&semaphore),
        stop: Arc::clone(&stop),
        cancel: cancel.clone(),
      };

      join_set.spawn(async move { (idx, task.run().await) });
    }

    let mut report = RunReport::default();
    let mut skipped = Vec::new();
    let mut not_started = Vec::new();

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((_, TaskOutcome::Finished(result))) => {
          report.cancelled |= result.is_interrupted();
          report.results.push(result);
        }
        Ok((idx, TaskOutcome::Skipped { dependency })) => skipped.push((idx, dependency)),
        Ok((idx, TaskOutcome::NotStarted { cancelled })) => {
          report.cancelled |= cancelled;
          not_started.push(idx);
        }
        Err(e) => {
          error!(error = %e, "action task panicked");
          stop.store(true, Ordering::SeqCst);
        }
      }
    }

    skipped.sort_by_key(|(idx, _)| *idx);
    not_started.sort_unstable();
    report.skipped = skipped
      .into_iter()
      .map(|(idx, dep)| (actions[idx].tool.clone(), dep))
      .collect();
    report.not_started = not_started.into_iter().map(|idx| actions[idx].tool.clone()).collect();

    report
  }
}

fn remaining(actions: &[Action]) -> Vec<String> {
  actions.iter().map(|a| a.tool.clone()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
  Pending,
  Succeeded,
  Failed,
  Skipped,
  /// Never ran because the run stopped.
  Aborted,
}

enum TaskOutcome {
  Finished(ExecutionResult),
  Skipped { dependency: String },
  NotStarted { cancelled: bool },
}

struct PoolTask<E> {
  executor: Executor<E>,
  action: Action,
  deps: Vec<(String, watch::Receiver<NodeState>)>,
  done: watch::Sender<NodeState>,
  semaphore: Arc<Semaphore>,
  stop: Arc<AtomicBool>,
  cancel: CancelSignal,
}

impl<E: Environment> PoolTask<E> {
  async fn run(mut self) -> TaskOutcome {
    let deps = std::mem::take(&mut self.deps);
    for (name, mut rx) in deps {
      // A dropped sender means the dependency's task died.
      let state = rx
        .wait_for(|s| *s != NodeState::Pending)
        .await
        .map(|s| *s)
        .unwrap_or(NodeState::Aborted);

      match state {
        NodeState::Succeeded => {}
        NodeState::Failed | NodeState::Skipped => {
          warn!(tool = %self.action.tool, failed_dep = %name, "skipping action due to failed dependency");
          self.done.send_replace(NodeState::Skipped);
          return TaskOutcome::Skipped { dependency: name };
        }
        NodeState::Pending | NodeState::Aborted => return self.abort(),
      }
    }

    let semaphore = Arc::clone(&self.semaphore);
    let Ok(_permit) = semaphore.acquire_owned().await else {
      return self.abort();
    };

    if self.stop.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
      return self.abort();
    }

    let result = match self.executor.execute(&self.action, &self.cancel).await {
      Ok(result) => result,
      // Unreachable after up-front validation, but keep the barrier honest.
      Err(e) => ExecutionResult {
        action: self.action.clone(),
        attempts: Vec::new(),
        duration: Duration::ZERO,
        failure: Some(e),
      },
    };

    if result.is_success() {
      self.done.send_replace(NodeState::Succeeded);
    } else if result.is_interrupted() {
      self.done.send_replace(NodeState::Aborted);
    } else {
      self.stop.store(true, Ordering::SeqCst);
      self.done.send_replace(NodeState::Failed);
    }

    TaskOutcome::Finished(result)
  }

  fn abort(self) -> TaskOutcome {
    let cancelled = self.cancel.is_cancelled();
    debug!(tool = %self.action.tool, cancelled, "action not started");
    self.done.send_replace(NodeState::Aborted);
    TaskOutcome::NotStarted { cancelled }
  }
}
