//! CLI smoke tests for converge.
//!
//! These tests check argument handling and exit codes without touching the
//! host: every manifest here is empty or rejected before anything runs.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the converge binary.
fn converge_cmd() -> Command {
  cargo_bin_cmd!("converge")
}

/// Create a temp directory with a `tools.toml` manifest.
fn temp_manifest(content: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("tools.toml"), content).unwrap();
  temp
}

fn run_manifest(temp: &TempDir) -> Command {
  let mut cmd = converge_cmd();
  cmd
    .arg("--manifest")
    .arg(temp.path().join("tools.toml"))
    .arg("--lock-file")
    .arg(temp.path().join("converge.lock"));
  cmd
}

const CYCLE_MANIFEST: &str = r#"
[[tool]]
name = "a"
kind = "runtime"
depends_on = ["b"]

[[tool]]
name = "b"
kind = "runtime"
depends_on = ["a"]
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  converge_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("--manifest"));
}

#[test]
fn version_flag_works() {
  converge_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn manifest_flag_is_required() {
  converge_cmd()
    .assert()
    .code(2)
    .stderr(predicate::str::contains("--manifest"));
}

#[test]
fn rejects_unknown_output_format() {
  converge_cmd()
    .args(["--manifest", "tools.toml", "--output", "yaml"])
    .assert()
    .code(2);
}

#[test]
fn rejects_zero_concurrency() {
  converge_cmd()
    .args(["--manifest", "tools.toml", "--concurrency", "0"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("--concurrency"));
}

#[test]
fn rejects_zero_max_cycles() {
  converge_cmd()
    .args(["--manifest", "tools.toml", "--max-cycles", "0"])
    .assert()
    .code(2);
}

#[test]
fn zero_concurrency_in_settings_is_validation_error() {
  let temp = temp_manifest("[settings]\nconcurrency = 0\n");

  run_manifest(&temp)
    .assert()
    .code(2)
    .stderr(predicate::str::contains("concurrency"));
}

// =============================================================================
// Manifest errors
// =============================================================================

#[test]
fn missing_manifest_file_fails() {
  let temp = TempDir::new().unwrap();

  run_manifest(&temp)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("failed to read manifest"));
}

#[test]
fn invalid_toml_is_validation_error() {
  let temp = temp_manifest("[[tool]\nname = ");

  run_manifest(&temp)
    .assert()
    .code(2)
    .stderr(predicate::str::contains("invalid manifest"));
}

#[test]
fn dependency_cycle_is_validation_error() {
  let temp = temp_manifest(CYCLE_MANIFEST);

  run_manifest(&temp)
    .assert()
    .code(2)
    .stderr(predicate::str::contains("dependency cycle detected"));
}

#[test]
fn unknown_dependency_is_validation_error() {
  let temp = temp_manifest("[[tool]]\nname = \"yq\"\nkind = \"standalone-binary\"\ninstall = \"true\"\ndepends_on = [\"node\"]\n");

  run_manifest(&temp)
    .assert()
    .code(2)
    .stderr(predicate::str::contains("depends on unknown tool node"));
}

#[test]
fn unknown_field_is_validation_error() {
  let temp = temp_manifest("[[tool]]\nname = \"jq\"\nkind = \"os-package\"\nflavour = \"vanilla\"\n");

  run_manifest(&temp).assert().code(2);
}

// =============================================================================
// Empty manifests
// =============================================================================

#[test]
fn empty_manifest_is_already_converged() {
  let temp = temp_manifest("");

  run_manifest(&temp)
    .assert()
    .success()
    .stdout(predicate::str::contains("already converged"));
}

#[test]
fn empty_manifest_from_stdin() {
  let temp = TempDir::new().unwrap();

  converge_cmd()
    .args(["--manifest", "-", "--lock-file"])
    .arg(temp.path().join("converge.lock"))
    .write_stdin("")
    .assert()
    .success();
}

#[test]
fn empty_manifest_json_output() {
  let temp = temp_manifest("");

  run_manifest(&temp)
    .args(["--output", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""outcome": "done""#))
    .stdout(predicate::str::contains(r#""exit_code": 0"#));
}
