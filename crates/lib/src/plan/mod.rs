//! Step planning.
//!
//! The planner turns a manifest and the latest verification report into the
//! ordered list of actions needed to close the drift. Satisfied tools produce
//! no action, so planning a converged environment yields an empty plan.

mod action;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::{DependencyGraph, Manifest, ValidationError};
use crate::verify::{ToolStatus, VerifyReport};

pub use action::{Action, ActionReason, Step};

/// Errors that can occur while planning.
#[derive(Debug, Error)]
pub enum PlanError {
  /// The manifest's dependency graph has a cycle.
  #[error("dependency cycle detected: {}", chain.join(" -> "))]
  Cycle { chain: Vec<String> },

  /// The manifest is otherwise invalid (e.g. a dependency is not declared).
  #[error("invalid manifest: {0}")]
  Manifest(ValidationError),
}

impl From<ValidationError> for PlanError {
  fn from(err: ValidationError) -> Self {
    match err {
      ValidationError::Cycle { chain } => PlanError::Cycle { chain },
      other => PlanError::Manifest(other),
    }
  }
}

/// Ordered actions for one convergence cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
  /// Actions in dependency order.
  pub actions: Vec<Action>,
  /// Tools that need no work, in declaration order.
  pub satisfied: Vec<String>,
}

impl Plan {
  pub fn is_empty(&self) -> bool {
    self.actions.is_empty()
  }

  pub fn len(&self) -> usize {
    self.actions.len()
  }

  /// Names of the planned tools, in execution order.
  pub fn tools(&self) -> Vec<&str> {
    self.actions.iter().map(|a| a.tool.as_str()).collect()
  }
}

/// Compute the plan for `manifest` given the environment described by
/// `report`.
///
/// Tools are ordered topologically by `depends_on`, ties broken by
/// declaration order. The dependency graph is re-checked here even though
/// [`Manifest::validate`] already rejects cycles, since the manifest's fields
/// are public. A tool absent from `report` is treated as missing.
pub fn plan(manifest: &Manifest, report: &VerifyReport) -> Result<Plan, PlanError> {
  let graph = DependencyGraph::build(manifest)?;
  let order = graph.topological_order()?;

  let mut result = Plan::default();
  let mut planned: Vec<&str> = Vec::new();

  for idx in order {
    let tool = &manifest.tools[idx];

    let reason = match report.status(&tool.name) {
      Some(ToolStatus::Satisfied { .. }) => {
        result.satisfied.push(tool.name.clone());
        continue;
      }
      Some(ToolStatus::Mismatched { found, .. }) => ActionReason::Upgrade { found: found.clone() },
      Some(ToolStatus::Missing) | None => ActionReason::Install,
    };

    let wait_for: Vec<String> = graph
      .dependencies(idx)
      .into_iter()
      .map(|dep| graph.name(dep))
      .filter(|dep| planned.contains(dep))
      .map(str::to_string)
      .collect();

    let action = Action::for_tool(tool, &manifest.settings, reason, wait_for);
    debug!(tool = %tool.name, step = action.step.as_str(), wait_for = ?action.wait_for, "planned action");
    planned.push(tool.name.as_str());
    result.actions.push(action);
  }

  // Keep `satisfied` in declaration order rather than topological order.
  result
    .satisfied
    .sort_by_key(|name| manifest.position(name).unwrap_or(usize::MAX));

  info!(actions = result.actions.len(), satisfied = result.satisfied.len(), "plan computed");
  Ok(result)
}
