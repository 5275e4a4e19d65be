//! Shell command execution.
//!
//! Commands run through a shell with the provisioner's own environment plus
//! any per-tool variables. Output is captured so a failing install can be
//! reported with what the package manager or script printed.

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::execute::types::{ExecuteError, StepOutput};

/// Output fragments that point at network trouble rather than a broken
/// install. A failing command whose output contains one of these is retried.
const TRANSIENT_PATTERNS: &[&str] = &[
  "temporary failure resolving",
  "temporary failure in name resolution",
  "could not resolve",
  "connection timed out",
  "connection refused",
  "connection reset",
  "network is unreachable",
  "failed to fetch",
  "unable to connect",
  "could not connect",
  "tls handshake timeout",
  "503 service unavailable",
  "502 bad gateway",
  "could not get lock",
];

/// Run `cmd` through `shell`.
///
/// Stdout and stderr are combined (stdout first) in the returned output. A
/// non-zero exit becomes [`ExecuteError::CmdFailed`], marked transient when
/// the output looks like a network failure.
pub async fn execute_cmd(
  cmd: &str,
  env: &BTreeMap<String, String>,
  shell: Option<&str>,
) -> Result<StepOutput, ExecuteError> {
  info!(cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .stdin(Stdio::null())
    .kill_on_drop(true)
    // Package managers must never prompt.
    .env("DEBIAN_FRONTEND", "noninteractive");

  for (key, value) in env {
    command.env(key, value);
  }

  // Keep the install out of the terminal's foreground group so Ctrl-C
  // reaches only the provisioner, which lets running actions finish.
  #[cfg(unix)]
  command.process_group(0);

  debug!(shell = %shell_cmd, "spawning process");

  let output = command.output().await?;
  let combined = combine_output(&output.stdout, &output.stderr);

  if !output.status.success() {
    if !combined.is_empty() {
      debug!(output = %combined, "command output");
    }
    return Err(ExecuteError::CmdFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      transient: looks_transient(&combined),
      output: combined,
    });
  }

  if !combined.is_empty() {
    debug!(output = %combined, "command output");
  }

  Ok(StepOutput {
    exit_code: output.status.code(),
    output: combined,
  })
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
  let stdout = String::from_utf8_lossy(stdout);
  let stderr = String::from_utf8_lossy(stderr);
  let stdout = stdout.trim();
  let stderr = stderr.trim();
  match (stdout.is_empty(), stderr.is_empty()) {
    (true, true) => String::new(),
    (false, true) => stdout.to_string(),
    (true, false) => stderr.to_string(),
    (false, false) => format!("{stdout}\n{stderr}"),
  }
}

/// Whether command output indicates a network-level failure.
pub fn looks_transient(output: &str) -> bool {
  let lower = output.to_ascii_lowercase();
  TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Get the shell command and arguments used to run a script.
///
/// Defaults to `/bin/sh` rather than `$SHELL`, since interactive shells may
/// source profile files.
pub(crate) fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;

  fn no_env() -> BTreeMap<String, String> {
    BTreeMap::new()
  }

  #[tokio::test]
  async fn execute_simple_command() {
    let result = execute_cmd("echo hello", &no_env(), None).await.unwrap();

    assert_eq!(result.output, "hello");
    assert_eq!(result.exit_code, Some(0));
  }

  #[tokio::test]
  async fn execute_command_with_env() {
    let mut env = BTreeMap::new();
    env.insert("MY_VAR".to_string(), "my_value".to_string());

    let result = execute_cmd("echo $MY_VAR", &env, None).await.unwrap();

    assert_eq!(result.output, "my_value");
  }

  #[tokio::test]
  async fn execute_command_inherits_environment() {
    let result = execute_cmd("echo $DEBIAN_FRONTEND", &no_env(), None).await.unwrap();

    assert_eq!(result.output, "noninteractive");
  }

  #[tokio::test]
  async fn stdout_and_stderr_are_combined() {
    let result = execute_cmd("echo out; echo err >&2", &no_env(), None).await.unwrap();

    assert_eq!(result.output, "out\nerr");
  }

  #[tokio::test]
  async fn execute_command_failure_captures_output() {
    let result = execute_cmd("echo 'E: Unable to locate package nope' >&2; exit 100", &no_env(), None).await;

    match result {
      Err(ExecuteError::CmdFailed {
        code,
        output,
        transient,
        ..
      }) => {
        assert_eq!(code, Some(100));
        assert_eq!(output, "E: Unable to locate package nope");
        assert!(!transient);
      }
      other => panic!("unexpected result {other:?}"),
    }
  }

  #[tokio::test]
  async fn network_failure_is_transient() {
    let result = execute_cmd(
      "echo 'Temporary failure resolving deb.debian.org' >&2; exit 100",
      &no_env(),
      None,
    )
    .await;

    assert!(matches!(result, Err(ExecuteError::CmdFailed { transient: true, .. })));
  }

  #[tokio::test]
  async fn execute_multiline_command() {
    let cmd = r#"
      x=1
      y=2
      echo $((x + y))
    "#;

    let result = execute_cmd(cmd, &no_env(), None).await.unwrap();

    assert_eq!(result.output, "3");
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn command_leads_its_own_process_group() {
    let result = execute_cmd("read -r _ _ _ _ pgrp _ < /proc/$$/stat; echo \"$$ $pgrp\"", &no_env(), None)
      .await
      .unwrap();

    let (pid, pgrp) = result.output.split_once(' ').unwrap();
    assert_eq!(pid, pgrp);
    assert_ne!(pgrp, std::process::id().to_string());
  }

  #[test]
  fn transient_patterns() {
    assert!(looks_transient("curl: (6) Could not resolve host: example.com"));
    assert!(looks_transient("E: Failed to fetch http://deb.debian.org/..."));
    assert!(!looks_transient("E: Unable to locate package nope"));
    assert!(!looks_transient(""));
  }

  #[test]
  fn get_shell_with_override() {
    let (shell, arg) = get_shell(Some("/usr/bin/bash"));
    assert_eq!(shell, "/usr/bin/bash");
    assert_eq!(arg, vec!["-c"]);
  }

  #[test]
  fn get_shell_with_pwsh_override() {
    let (shell, args) = get_shell(Some("pwsh"));
    assert_eq!(shell, "pwsh");
    assert_eq!(args, vec!["-NoProfile", "-Command"]);
  }

  #[test]
  fn get_shell_default() {
    let (shell, args) = get_shell(None);
    assert_eq!(shell, "/bin/sh");
    assert_eq!(args, vec!["-c"]);
  }
}
