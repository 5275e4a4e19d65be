//! Step execution.
//!
//! Dispatches a planned [`Step`] to the shell or download handler.

pub mod cmd;
pub mod fetch;

use std::collections::BTreeMap;

use crate::execute::types::{ExecuteError, StepOutput};
use crate::plan::Step;

pub use cmd::{execute_cmd, looks_transient};
pub use fetch::execute_fetch;

/// Execute a single step.
///
/// Package installs and scripts run through `shell`; downloads go through
/// HTTP. `env` is added to the environment of shell commands.
pub async fn execute_step(
  step: &Step,
  env: &BTreeMap<String, String>,
  shell: Option<&str>,
) -> Result<StepOutput, ExecuteError> {
  match step {
    Step::InstallPackage { manager, package, pin } => {
      let cmd = manager.install_command(package, pin.as_deref());
      execute_cmd(&cmd, env, shell).await
    }
    Step::RunScript { script } => execute_cmd(script, env, shell).await,
    Step::DownloadAndLink { url, sha256, dest } => execute_fetch(url, sha256.as_deref(), dest).await,
  }
}
