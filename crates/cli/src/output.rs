//! Terminal rendering for converge runs.
//!
//! Plan entries, action results and failure details are built as plain
//! strings so their layout can be tested. The `print_*` helpers only add
//! color, and only when the stream is a terminal that supports it.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use converge_lib::converge::FatalReport;
use converge_lib::execute::ExecutionResult;
use converge_lib::plan::{Action, ActionReason};

/// How a run is reported on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  /// One JSON document describing the whole run.
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  /// Plan entry for a missing tool.
  pub const INSTALL: &str = "+";
  /// Plan entry for a tool at the wrong version.
  pub const UPGRADE: &str = "~";
}

/// Duration of an action as shown on its result line: `850ms`, `2.35s`,
/// `1m 05s`.
pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  if millis < 1_000 {
    format!("{millis}ms")
  } else if millis < 60_000 {
    format!("{}.{:02}s", millis / 1_000, (millis % 1_000) / 10)
  } else {
    let secs = duration.as_secs();
    format!("{}m {:02}s", secs / 60, secs % 60)
  }
}

/// `""` or `"s"`, for nouns with a regular plural.
pub fn plural(n: usize) -> &'static str {
  if n == 1 { "" } else { "s" }
}

/// A plan entry: `  + install node (run-script)`, followed by an
/// `after ...` line when the action waits for other tools.
pub fn plan_entry(action: &Action) -> String {
  let symbol = match action.reason {
    ActionReason::Install => symbols::INSTALL,
    ActionReason::Upgrade { .. } => symbols::UPGRADE,
  };
  let mut entry = format!("  {symbol} {action}");
  if !action.wait_for.is_empty() {
    entry.push_str(&format!("\n      after {}", action.wait_for.join(", ")));
  }
  entry
}

/// One executed action: symbol, step, wall time and retries.
pub fn result_line(result: &ExecutionResult) -> String {
  let symbol = if result.is_success() {
    symbols::SUCCESS
  } else if result.is_interrupted() {
    symbols::WARNING
  } else {
    symbols::ERROR
  };
  let retries = match result.retries() {
    0 => String::new(),
    1 => ", 1 retry".to_string(),
    n => format!(", {n} retries"),
  };
  format!(
    "  {symbol} {} ({}{retries})",
    result.action,
    format_duration(result.duration)
  )
}

/// `node → yq`
pub fn dependency_chain(tools: &[String]) -> String {
  tools.join(&format!(" {} ", symbols::ARROW))
}

/// Indented detail lines printed under the failure headline.
pub fn fatal_details(fatal: &FatalReport) -> Vec<String> {
  let mut lines = Vec::new();
  if let Some(action) = &fatal.action {
    lines.push(format!("  Step: {action}"));
  }
  if let Some(command) = &fatal.command {
    lines.push(format!("  Command: {command}"));
  }
  lines.push(format!("  Dependency chain: {}", dependency_chain(&fatal.chain)));
  if !fatal.blocked.is_empty() {
    lines.push(format!("  Not run: {}", fatal.blocked.join(", ")));
  }
  if !fatal.output.is_empty() {
    lines.push("  Output:".to_string());
    lines.extend(fatal.output.lines().map(|line| format!("    {line}")));
  }
  lines
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

/// Errors go to stderr so JSON on stdout stays parseable.
pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// `  Base image: debian:bookworm-slim`, with the label dimmed.
pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize run report")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use converge_lib::converge::FatalKind;
  use converge_lib::execute::{Attempt, ExecuteError};
  use converge_lib::manifest::{Settings, ToolKind, ToolSpec};

  fn script_action(name: &str, reason: ActionReason, wait_for: &[&str]) -> Action {
    let mut tool = ToolSpec::new(name, ToolKind::Runtime);
    tool.install = Some(format!("install-{name}"));
    Action::for_tool(
      &tool,
      &Settings::default(),
      reason,
      wait_for.iter().map(|s| s.to_string()).collect(),
    )
  }

  fn result(attempts: u32, failure: Option<ExecuteError>) -> ExecutionResult {
    ExecutionResult {
      action: script_action("node", ActionReason::Install, &[]),
      attempts: (1..=attempts)
        .map(|number| Attempt {
          number,
          exit_code: Some(0),
          output: String::new(),
          duration: Duration::from_millis(100),
          error: None,
        })
        .collect(),
      duration: Duration::from_millis(1_250),
      failure,
    }
  }

  #[test]
  fn durations() {
    assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
    assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
    assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
  }

  #[test]
  fn json_format_flag() {
    assert!(OutputFormat::Json.is_json());
    assert!(!OutputFormat::default().is_json());
  }

  #[test]
  fn plan_entry_marks_install_and_upgrade() {
    let install = script_action("yq", ActionReason::Install, &["node"]);
    assert_eq!(plan_entry(&install), "  + install yq (run-script)\n      after node");

    let upgrade = script_action(
      "node",
      ActionReason::Upgrade {
        found: Some("18.19.1".to_string()),
      },
      &[],
    );
    assert_eq!(plan_entry(&upgrade), "  ~ upgrade node (run-script)");
  }

  #[test]
  fn result_line_counts_retries() {
    assert_eq!(result_line(&result(1, None)), "  ✓ install node (run-script) (1.25s)");
    assert_eq!(result_line(&result(2, None)), "  ✓ install node (run-script) (1.25s, 1 retry)");

    let failed = result(
      3,
      Some(ExecuteError::MalformedAction {
        tool: "node".to_string(),
        message: "x".to_string(),
      }),
    );
    assert_eq!(result_line(&failed), "  ✗ install node (run-script) (1.25s, 2 retries)");
  }

  #[test]
  fn interrupted_result_is_a_warning() {
    let interrupted = result(
      1,
      Some(ExecuteError::Interrupted {
        attempts: 1,
        last: Box::new(ExecuteError::Timeout {
          cmd: "install-node".to_string(),
          after: Duration::from_secs(1),
        }),
      }),
    );
    assert!(result_line(&interrupted).starts_with("  ⚠ install node"));
  }

  #[test]
  fn fatal_details_layout() {
    let fatal = FatalReport {
      kind: FatalKind::Execution,
      tool: "yq".to_string(),
      action: Some("install yq (run-script)".to_string()),
      command: None,
      cause: "command failed with exit code Some(100)".to_string(),
      output: "E: Unable to locate package yq\nE: giving up".to_string(),
      chain: vec!["node".to_string(), "yq".to_string()],
      blocked: vec!["yq-plugins".to_string()],
    };

    assert_eq!(
      fatal_details(&fatal),
      vec![
        "  Step: install yq (run-script)",
        "  Dependency chain: node → yq",
        "  Not run: yq-plugins",
        "  Output:",
        "    E: Unable to locate package yq",
        "    E: giving up",
      ]
    );
  }
}
