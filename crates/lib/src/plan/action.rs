//! Provisioning actions.
//!
//! An action is one imperative step derived from a [`ToolSpec`]. Actions are
//! produced by the planner, consumed by the executor and never persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::manifest::{PackageManager, Settings, ToolKind, ToolSpec};

/// The concrete step an action performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Step {
  /// Install a package through the system package manager.
  InstallPackage {
    manager: PackageManager,
    package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pin: Option<String>,
  },
  /// Run an install script through the shell.
  RunScript { script: String },
  /// Download an executable and place it at `dest`.
  DownloadAndLink {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    dest: PathBuf,
  },
}

impl Step {
  pub fn as_str(&self) -> &'static str {
    match self {
      Step::InstallPackage { .. } => "install-package",
      Step::RunScript { .. } => "run-script",
      Step::DownloadAndLink { .. } => "download-and-link",
    }
  }
}

/// Why a tool is being (re)installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum ActionReason {
  /// The tool is not present.
  Install,
  /// The tool is present but its version does not satisfy the constraint.
  Upgrade {
    #[serde(skip_serializing_if = "Option::is_none")]
    found: Option<String>,
  },
}

/// One provisioning step for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
  pub tool: String,
  pub kind: ToolKind,
  pub step: Step,
  #[serde(flatten)]
  pub reason: ActionReason,
  /// Planned tools whose actions must complete successfully first.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub wait_for: Vec<String>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
  #[serde(skip)]
  pub timeout: Option<Duration>,
}

impl Action {
  /// Derive the action for a tool.
  ///
  /// An explicit `install` script always wins. Otherwise `os-package` and
  /// `runtime` tools go through the package manager and `standalone-binary`
  /// tools are downloaded into `bin_dir`.
  pub fn for_tool(tool: &ToolSpec, settings: &Settings, reason: ActionReason, wait_for: Vec<String>) -> Self {
    let step = match (&tool.install, tool.kind, &tool.url) {
      (Some(script), _, _) => Step::RunScript { script: script.clone() },
      (None, ToolKind::StandaloneBinary, Some(url)) => Step::DownloadAndLink {
        url: url.clone(),
        sha256: tool.sha256.clone(),
        dest: settings.bin_dir.join(tool.binary_name()),
      },
      (None, _, _) => Step::InstallPackage {
        manager: settings.package_manager,
        package: tool.name.clone(),
        pin: tool.version.exact(),
      },
    };

    Self {
      tool: tool.name.clone(),
      kind: tool.kind,
      step,
      reason,
      wait_for,
      env: tool.env.clone(),
      timeout: tool.timeout,
    }
  }

  /// Check the action is executable. A failure here is a bug in whoever
  /// built the action, not an environment failure.
  pub fn validate(&self) -> Result<(), String> {
    if self.tool.trim().is_empty() {
      return Err("action has no tool name".to_string());
    }
    match &self.step {
      Step::InstallPackage { package, .. } if package.trim().is_empty() => Err("empty package name".to_string()),
      Step::RunScript { script } if script.trim().is_empty() => Err("empty install script".to_string()),
      Step::DownloadAndLink { url, .. } if url.trim().is_empty() => Err("empty download url".to_string()),
      Step::DownloadAndLink { dest, .. } if dest.file_name().is_none() => {
        Err(format!("destination {} has no file name", dest.display()))
      }
      _ => Ok(()),
    }
  }

  /// Short human description of what the step runs.
  pub fn command_line(&self) -> String {
    match &self.step {
      Step::InstallPackage { manager, package, pin } => manager.install_command(package, pin.as_deref()),
      Step::RunScript { script } => script.trim().to_string(),
      Step::DownloadAndLink { url, dest, .. } => format!("download {url} -> {}", dest.display()),
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let verb = match &self.reason {
      ActionReason::Install => "install",
      ActionReason::Upgrade { .. } => "upgrade",
    };
    write!(f, "{verb} {} ({})", self.tool, self.step.as_str())
  }
}
