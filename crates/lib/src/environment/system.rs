//! The local host as an [`Environment`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, trace};

use crate::execute::actions::{execute_cmd, execute_step};
use crate::execute::{ExecuteError, StepOutput};
use crate::manifest::{PackageManager, Settings, ToolKind, ToolSpec};
use crate::plan::Action;
use crate::util::{shell_quote, shell_quote_path};
use crate::verify::extract_version;

use super::{Environment, Probe};

/// Upper bound on a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Provisions the machine the process runs on.
#[derive(Debug, Clone)]
pub struct SystemEnvironment {
  shell: Option<String>,
  package_manager: PackageManager,
  bin_dir: PathBuf,
}

impl SystemEnvironment {
  pub fn new(settings: &Settings) -> Self {
    Self {
      shell: settings.shell.clone(),
      package_manager: settings.package_manager,
      bin_dir: settings.bin_dir.clone(),
    }
  }

  /// Shell command that succeeds, printing the version, only if `tool` is
  /// present.
  fn probe_command(&self, tool: &ToolSpec) -> String {
    if let Some(check) = &tool.check {
      return check.clone();
    }

    match tool.kind {
      ToolKind::OsPackage if tool.install.is_none() => self.package_manager.query_command(&tool.name),
      ToolKind::StandaloneBinary if tool.install.is_none() && tool.url.is_some() => {
        let dest = shell_quote_path(&self.bin_dir.join(tool.binary_name()));
        format!("test -x {dest} || exit 1; {dest} --version 2>&1 || true")
      }
      _ => {
        let binary = shell_quote(tool.binary_name());
        format!("command -v {binary} >/dev/null 2>&1 || exit 1; {binary} --version 2>&1 || true")
      }
    }
  }
}

impl Environment for SystemEnvironment {
  async fn run(&self, action: &Action) -> Result<StepOutput, ExecuteError> {
    execute_step(&action.step, &action.env, self.shell.as_deref()).await
  }

  async fn probe(&self, tool: &ToolSpec) -> Result<Probe, ExecuteError> {
    let cmd = self.probe_command(tool);
    trace!(tool = %tool.name, cmd = %cmd, "probing");

    let result = tokio::time::timeout(PROBE_TIMEOUT, execute_cmd(&cmd, &BTreeMap::new(), self.shell.as_deref()))
      .await
      .map_err(|_| ExecuteError::Timeout {
        cmd: cmd.clone(),
        after: PROBE_TIMEOUT,
      })?;

    match result {
      Ok(out) => {
        let version = extract_version(&out.output);
        debug!(tool = %tool.name, version = ?version.as_ref().map(ToString::to_string), "tool present");
        Ok(Probe::Present { version })
      }
      Err(ExecuteError::CmdFailed { code, .. }) => {
        debug!(tool = %tool.name, code = ?code, "tool absent");
        Ok(Probe::Absent)
      }
      Err(e) => Err(e),
    }
  }
}
