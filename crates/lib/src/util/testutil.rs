//! Test utilities for converge-lib.
//!
//! [`FakeEnvironment`] is an in-memory [`Environment`]: probes read a map of
//! installed tools and successful actions write to it. Failures, delays and
//! no-op installs can be scripted per tool.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::environment::{Environment, Probe};
use crate::execute::{ExecuteError, StepOutput};
use crate::manifest::ToolSpec;
use crate::plan::Action;
use crate::verify::parse_lenient;

/// A scripted action failure.
#[derive(Debug, Clone)]
pub enum FakeFailure {
  /// Looks like a network error: retried.
  Transient,
  /// Not retried; carries the output to report.
  Fatal(String),
}

/// Start and end of an action, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  Started(String),
  Finished(String),
}

#[derive(Debug, Default)]
struct FakeState {
  installed: BTreeMap<String, Option<String>>,
  failing_probes: BTreeSet<String>,
  queued_failures: HashMap<String, VecDeque<FakeFailure>>,
  permanent_failures: HashMap<String, FakeFailure>,
  install_versions: HashMap<String, Option<String>>,
  no_ops: BTreeSet<String>,
  delays: HashMap<String, Duration>,
  run_log: Vec<String>,
  events: Vec<Event>,
}

#[derive(Debug, Default)]
pub struct FakeEnvironment {
  state: Mutex<FakeState>,
}

impl FakeEnvironment {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark `name` as already installed.
  pub fn install(&self, name: &str, version: Option<&str>) {
    let mut state = self.state.lock().unwrap();
    state.installed.insert(name.to_string(), version.map(str::to_string));
  }

  pub fn is_installed(&self, name: &str) -> bool {
    self.state.lock().unwrap().installed.contains_key(name)
  }

  /// Make probing `name` fail outright.
  pub fn fail_probe(&self, name: &str) {
    self.state.lock().unwrap().failing_probes.insert(name.to_string());
  }

  /// Version recorded when `name`'s action succeeds. Defaults to unknown.
  pub fn installs_version(&self, name: &str, version: &str) {
    let mut state = self.state.lock().unwrap();
    state.install_versions.insert(name.to_string(), Some(version.to_string()));
  }

  /// Fail the next `times` runs of `name` transiently.
  pub fn fail_transient(&self, name: &str, times: usize) {
    let mut state = self.state.lock().unwrap();
    let queue = state.queued_failures.entry(name.to_string()).or_default();
    queue.extend(std::iter::repeat_n(FakeFailure::Transient, times));
  }

  /// Fail every run of `name`.
  pub fn fail_always(&self, name: &str, failure: FakeFailure) {
    let mut state = self.state.lock().unwrap();
    state.permanent_failures.insert(name.to_string(), failure);
  }

  /// Let `name`'s action succeed without installing anything.
  pub fn no_op(&self, name: &str) {
    self.state.lock().unwrap().no_ops.insert(name.to_string());
  }

  /// Hold `name`'s action for `delay` before it completes.
  pub fn delay(&self, name: &str, delay: Duration) {
    self.state.lock().unwrap().delays.insert(name.to_string(), delay);
  }

  /// Tools whose actions were run, one entry per attempt.
  pub fn run_log(&self) -> Vec<String> {
    self.state.lock().unwrap().run_log.clone()
  }

  pub fn events(&self) -> Vec<Event> {
    self.state.lock().unwrap().events.clone()
  }

  /// Index of the first matching event, for ordering assertions.
  pub fn event_index(&self, event: &Event) -> Option<usize> {
    self.state.lock().unwrap().events.iter().position(|e| e == event)
  }
}

impl Environment for FakeEnvironment {
  async fn run(&self, action: &Action) -> Result<StepOutput, ExecuteError> {
    let tool = action.tool.clone();
    let (delay, failure) = {
      let mut state = self.state.lock().unwrap();
      state.run_log.push(tool.clone());
      state.events.push(Event::Started(tool.clone()));
      let queued = state.queued_failures.get_mut(&tool).and_then(VecDeque::pop_front);
      let failure = queued.or_else(|| state.permanent_failures.get(&tool).cloned());
      (state.delays.get(&tool).copied(), failure)
    };

    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut state = self.state.lock().unwrap();
    state.events.push(Event::Finished(tool.clone()));

    match failure {
      Some(FakeFailure::Transient) => Err(ExecuteError::CmdFailed {
        cmd: action.command_line(),
        code: Some(100),
        output: "Temporary failure resolving 'deb.debian.org'".to_string(),
        transient: true,
      }),
      Some(FakeFailure::Fatal(output)) => Err(ExecuteError::CmdFailed {
        cmd: action.command_line(),
        code: Some(1),
        output,
        transient: false,
      }),
      None => {
        if !state.no_ops.contains(&tool) {
          let version = state.install_versions.get(&tool).cloned().flatten();
          state.installed.insert(tool.clone(), version);
        }
        Ok(StepOutput {
          exit_code: Some(0),
          output: format!("installed {tool}"),
        })
      }
    }
  }

  async fn probe(&self, tool: &ToolSpec) -> Result<Probe, ExecuteError> {
    let state = self.state.lock().unwrap();
    if state.failing_probes.contains(&tool.name) {
      return Err(ExecuteError::Io(std::io::Error::other(format!(
        "cannot probe {}",
        tool.name
      ))));
    }
    Ok(match state.installed.get(&tool.name) {
      None => Probe::Absent,
      Some(version) => Probe::Present {
        version: version.as_deref().and_then(parse_lenient),
      },
    })
  }
}
