//! State verification.
//!
//! The verifier probes the environment for every tool in a manifest and
//! classifies each one as satisfied, missing, or present in a version the
//! manifest does not accept. It never mutates the environment.

mod version;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::environment::{Environment, Probe};
use crate::manifest::Manifest;

pub use version::{extract_version, parse_lenient};

/// Verification outcome for a single tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ToolStatus {
  /// Present in an acceptable version.
  Satisfied {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
  },
  /// Not present.
  Missing,
  /// Present, but the version is outside the constraint or unknown while a
  /// constraint is set.
  Mismatched {
    #[serde(skip_serializing_if = "Option::is_none")]
    found: Option<String>,
    wanted: String,
  },
}

impl ToolStatus {
  pub fn is_satisfied(&self) -> bool {
    matches!(self, ToolStatus::Satisfied { .. })
  }
}

/// What is actually installed: tool name to version, `None` when the tool
/// is present but its version could not be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentState {
  pub installed: BTreeMap<String, Option<String>>,
}

impl EnvironmentState {
  pub fn is_installed(&self, name: &str) -> bool {
    self.installed.contains_key(name)
  }

  pub fn version(&self, name: &str) -> Option<&str> {
    self.installed.get(name).and_then(|v| v.as_deref())
  }
}

/// Status of one tool in a [`VerifyReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCheck {
  pub name: String,
  #[serde(flatten)]
  pub status: ToolStatus,
}

/// Drift between a manifest and the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
  /// Per-tool status in manifest declaration order.
  pub tools: Vec<ToolCheck>,
  pub state: EnvironmentState,
}

impl VerifyReport {
  /// Returns true if every tool is satisfied.
  pub fn is_satisfied(&self) -> bool {
    self.tools.iter().all(|t| t.status.is_satisfied())
  }

  pub fn status(&self, name: &str) -> Option<&ToolStatus> {
    self.tools.iter().find(|t| t.name == name).map(|t| &t.status)
  }

  pub fn satisfied(&self) -> Vec<&str> {
    self.names_where(|s| matches!(s, ToolStatus::Satisfied { .. }))
  }

  pub fn missing(&self) -> Vec<&str> {
    self.names_where(|s| matches!(s, ToolStatus::Missing))
  }

  pub fn mismatched(&self) -> Vec<&str> {
    self.names_where(|s| matches!(s, ToolStatus::Mismatched { .. }))
  }

  /// Number of tools that are not satisfied.
  pub fn drift(&self) -> usize {
    self.tools.iter().filter(|t| !t.status.is_satisfied()).count()
  }

  fn names_where(&self, pred: impl Fn(&ToolStatus) -> bool) -> Vec<&str> {
    self
      .tools
      .iter()
      .filter(|t| pred(&t.status))
      .map(|t| t.name.as_str())
      .collect()
  }
}

/// Probe the environment for every tool in the manifest.
///
/// A probe that cannot run at all is logged and the tool counted as missing:
/// the planner will then schedule its install, and a broken environment
/// surfaces as an execution failure with captured output.
pub async fn verify<E: Environment>(manifest: &Manifest, env: &E) -> VerifyReport {
  let mut report = VerifyReport::default();

  for tool in &manifest.tools {
    let probe = match env.probe(tool).await {
      Ok(probe) => probe,
      Err(e) => {
        warn!(tool = %tool.name, error = %e, "probe failed, treating tool as missing");
        Probe::Absent
      }
    };

    let status = match probe {
      Probe::Absent => ToolStatus::Missing,
      Probe::Present { version } => {
        let found = version.as_ref().map(|v| v.to_string());
        report.state.installed.insert(tool.name.clone(), found.clone());

        let acceptable = match &version {
          Some(v) => tool.version.matches(v),
          None => tool.version.is_any(),
        };
        if acceptable {
          ToolStatus::Satisfied { version: found }
        } else {
          ToolStatus::Mismatched {
            found,
            wanted: tool.version.to_string(),
          }
        }
      }
    };

    debug!(tool = %tool.name, status = ?status, "verified tool");
    report.tools.push(ToolCheck {
      name: tool.name.clone(),
      status,
    });
  }

  info!(
    satisfied = report.satisfied().len(),
    missing = report.missing().len(),
    mismatched = report.mismatched().len(),
    "verification complete"
  );

  report
}
