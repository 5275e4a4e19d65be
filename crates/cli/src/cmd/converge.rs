//! Implementation of the `converge` command.
//!
//! Loads a manifest, drives the local environment to match it, and reports
//! the outcome as text or JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use converge_lib::converge::{ConvergeOptions, ConvergeReport, Driver, FatalReport, ManifestSource, Outcome};
use converge_lib::environment::SystemEnvironment;
use converge_lib::manifest::ValidationError;
use converge_lib::plan::Plan;
use converge_lib::util::CancelSignal;
use converge_lib::verify::ToolStatus;

use crate::output::{
  OutputFormat, fatal_details, plan_entry, plural, print_error, print_info, print_json, print_stat, print_success,
  print_warning, result_line, symbols,
};

/// Execute the converge command and return the process exit code.
///
/// Validation failures exit with 2 and a run interrupted by Ctrl-C with 130.
/// Any other failure exits with 1.
pub fn cmd_converge(source: &ManifestSource, options: ConvergeOptions, format: OutputFormat) -> Result<u8> {
  let manifest = match source.load() {
    Ok(manifest) => manifest,
    // An unreadable manifest is an I/O failure, not a validation one.
    Err(e @ ValidationError::Read { .. }) => {
      print_error(&e.to_string());
      return Ok(1);
    }
    Err(e) => {
      print_error(&format!("invalid manifest {}: {}", source.label(), e));
      return Ok(2);
    }
  };

  let dry_run = options.dry_run;
  let env = Arc::new(SystemEnvironment::new(&manifest.settings));
  let cancel = CancelSignal::new();
  let driver = Driver::new(env, options).with_cancel(cancel.clone());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    tokio::spawn(watch_ctrl_c(cancel));
    driver.run(&manifest, &source.label()).await
  });

  let report = match result {
    Ok(report) => report,
    Err(e) => {
      print_error(&e.to_string());
      return Ok(e.exit_code());
    }
  };

  if format.is_json() {
    print_json(&report_json(&report))?;
  } else if dry_run {
    print_dry_run(&report);
  } else {
    print_report(&report);
  }

  Ok(report.exit_code())
}

async fn watch_ctrl_c(cancel: CancelSignal) {
  match tokio::signal::ctrl_c().await {
    Ok(()) => {
      warn!("interrupted, waiting for running actions to finish");
      cancel.cancel();
    }
    Err(e) => debug!(error = %e, "could not listen for Ctrl-C"),
  }
}

fn print_dry_run(report: &ConvergeReport) {
  match report.plans.first() {
    Some(plan) => {
      print_info(&format!("Plan ({} action{}):", plan.len(), plural(plan.len())));
      print_plan(plan);
    }
    None => print_success("Environment already converged, nothing to do"),
  }
  if let Some(image) = &report.base_image {
    print_stat("Base image", image);
  }
}

fn print_plan(plan: &Plan) {
  for action in &plan.actions {
    println!("{}", plan_entry(action));
  }
  for tool in &plan.satisfied {
    println!("  {} {} (satisfied)", symbols::INFO, tool);
  }
}

fn print_report(report: &ConvergeReport) {
  match &report.outcome {
    Outcome::Done if report.actions_run() == 0 => {
      print_success("Environment already converged, nothing to do");
    }
    Outcome::Done => {
      print_success(&format!(
        "Environment converged: {} action{} in {} cycle{}",
        report.actions_run(),
        plural(report.actions_run()),
        report.cycles,
        plural(report.cycles as usize)
      ));
      print_results(report);
    }
    Outcome::Fatal(fatal) => {
      print_results(report);
      print_fatal(fatal);
    }
    Outcome::Cancelled => {
      print_results(report);
      print_warning(&format!(
        "Cancelled after {} action{}",
        report.actions_run(),
        plural(report.actions_run())
      ));
    }
  }
}

fn print_results(report: &ConvergeReport) {
  for result in &report.results {
    println!("{}", result_line(result));
  }
}

fn print_fatal(fatal: &FatalReport) {
  print_error(&format!("Provisioning failed at {}: {}", fatal.tool, fatal.cause));
  for line in fatal_details(fatal) {
    eprintln!("{line}");
  }
}

fn report_json(report: &ConvergeReport) -> serde_json::Value {
  let tools: Vec<_> = report
    .last
    .tools
    .iter()
    .map(|check| {
      let (status, version) = match &check.status {
        ToolStatus::Satisfied { version } => ("satisfied", version.clone()),
        ToolStatus::Missing => ("missing", None),
        ToolStatus::Mismatched { found, .. } => ("mismatched", found.clone()),
      };
      json!({ "name": check.name, "status": status, "version": version })
    })
    .collect();
  let results: Vec<_> = report
    .results
    .iter()
    .map(|result| {
      json!({
        "tool": result.action.tool,
        "action": result.action.to_string(),
        "success": result.is_success(),
        "attempts": result.attempts.len(),
        "duration_ms": result.duration.as_millis() as u64,
        "exit_code": result.exit_code(),
      })
    })
    .collect();

  json!({
    "outcome": report.outcome.phase(),
    "fatal": report.fatal(),
    "dry_run": report.dry_run,
    "base_image": report.base_image,
    "cycles": report.cycles,
    "plan": report.plans.first(),
    "results": results,
    "tools": tools,
    "exit_code": report.exit_code(),
  })
}
