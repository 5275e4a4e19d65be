mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use converge_lib::converge::{ConvergeOptions, ManifestSource};

use crate::output::{OutputFormat, print_error};

/// Converge a machine or container image to a declared set of tools.
#[derive(Parser)]
#[command(name = "converge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Manifest to apply, or `-` to read it from stdin
  #[arg(short, long, value_name = "PATH")]
  manifest: String,

  /// Show the plan without executing it
  #[arg(long)]
  dry_run: bool,

  /// Maximum actions running at once (1 = sequential)
  #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
  concurrency: Option<u64>,

  /// Retries for each action after a transient failure
  #[arg(long, value_name = "N")]
  max_retries: Option<u32>,

  /// Execute cycles before a persistent mismatch is fatal
  #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
  max_cycles: Option<u32>,

  /// Default per-action timeout, e.g. `90s` or `10m`
  #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Lock file guarding the environment
  #[arg(long, value_name = "PATH")]
  lock_file: Option<PathBuf>,

  /// Output format
  #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

impl Cli {
  fn options(&self) -> ConvergeOptions {
    ConvergeOptions {
      dry_run: self.dry_run,
      concurrency: self.concurrency.map(|n| n as usize),
      max_retries: self.max_retries,
      max_cycles: self.max_cycles,
      timeout: self.timeout,
      lock_path: self.lock_file.clone(),
      command: std::env::args().collect::<Vec<_>>().join(" "),
      ..Default::default()
    }
  }
}

fn init_logging(verbose: u8) {
  let default_level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let source = ManifestSource::parse(&cli.manifest);
  match cmd::cmd_converge(&source, cli.options(), cli.output) {
    Ok(code) => ExitCode::from(code),
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
