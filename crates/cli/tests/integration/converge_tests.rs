//! Converge command integration tests.

use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::time::{Duration, Instant};

use converge_lib::consts::LOCK_FILENAME;
use converge_lib::env_lock::{EnvLock, LockMode};
use predicates::prelude::*;
use rustix::process::{Pid, Signal, kill_process_group};

use super::common::TestEnv;

const NODE_AND_YQ: &str = r#"
base_image = "debian:bookworm-slim"

[[tool]]
name = "node"
kind = "runtime"
version = ">=20"
install = "echo v20.11.0 > {dir}/state/node; echo node >> {dir}/order"
check = "cat {dir}/state/node"

[[tool]]
name = "yq"
kind = "standalone-binary"
version = "^4"
depends_on = ["node"]
install = "echo 'yq version v4.44.1' > {dir}/state/yq; echo yq >> {dir}/order"
check = "cat {dir}/state/yq"
"#;

const BROKEN_YQ: &str = r#"
[[tool]]
name = "node"
kind = "runtime"
install = "echo v20.11.0 > {dir}/state/node"
check = "cat {dir}/state/node"

[[tool]]
name = "yq"
kind = "standalone-binary"
depends_on = ["node"]
install = "echo 'E: Unable to locate package yq' >&2; exit 100"
check = "cat {dir}/state/yq"

[[tool]]
name = "yq-plugins"
kind = "runtime"
depends_on = ["yq"]
install = "echo 1.0.0 > {dir}/state/yq-plugins"
check = "cat {dir}/state/yq-plugins"
"#;

#[test]
fn converges_empty_environment() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);

  env
    .converge_cmd()
    .assert()
    .success()
    .stdout(predicate::str::contains("Environment converged: 2 actions in 1 cycle"))
    .stdout(predicate::str::contains("install node (run-script)"))
    .stdout(predicate::str::contains("install yq (run-script)"));

  assert_eq!(env.read("order"), "node\nyq\n");
}

#[test]
fn converge_is_idempotent() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);

  env.converge_cmd().assert().success();

  env
    .converge_cmd()
    .assert()
    .success()
    .stdout(predicate::str::contains("already converged"));

  assert_eq!(env.read("order"), "node\nyq\n");
}

#[test]
fn dry_run_prints_plan_without_installing() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);

  env
    .converge_cmd()
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Plan (2 actions)"))
    .stdout(predicate::str::contains("+ install node (run-script)"))
    .stdout(predicate::str::contains("after node"))
    .stdout(predicate::str::contains("debian:bookworm-slim"));

  assert!(!env.state("node").exists());
  assert!(!env.state("yq").exists());
}

#[test]
fn dry_run_shows_upgrade_for_old_version() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);
  std::fs::write(env.state("node"), "v18.19.1\n").unwrap();

  env
    .converge_cmd()
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("~ upgrade node (run-script)"));
}

#[test]
fn failure_reports_step_output_and_chain() {
  let env = TestEnv::with_manifest(BROKEN_YQ);

  env
    .converge_cmd()
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Provisioning failed at yq"))
    .stderr(predicate::str::contains("Step: install yq (run-script)"))
    .stderr(predicate::str::contains("Dependency chain: node → yq"))
    .stderr(predicate::str::contains("Not run: yq-plugins"))
    .stderr(predicate::str::contains("E: Unable to locate package yq"));

  assert!(env.state("node").exists());
  assert!(!env.state("yq-plugins").exists());
}

#[test]
fn failure_json_output() {
  let env = TestEnv::with_manifest(BROKEN_YQ);

  env
    .converge_cmd()
    .args(["--output", "json"])
    .assert()
    .code(1)
    .stdout(predicate::str::contains(r#""outcome": "fatal""#))
    .stdout(predicate::str::contains(r#""tool": "yq""#))
    .stdout(predicate::str::contains(r#""exit_code": 1"#));
}

#[test]
fn transient_failure_gives_up_after_retries() {
  let env = TestEnv::with_manifest(
    r#"
[[tool]]
name = "curl"
kind = "os-package"
install = "echo attempt >> {dir}/attempts; echo 'Temporary failure resolving deb.debian.org' >&2; exit 100"
check = "cat {dir}/state/curl"
"#,
  );

  env
    .converge_cmd()
    .args(["--max-retries", "1"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("gave up after 2 attempts"));

  assert_eq!(env.read("attempts").lines().count(), 2);
}

#[test]
fn persistent_mismatch_escalates() {
  let env = TestEnv::with_manifest(
    r#"
[[tool]]
name = "python3"
kind = "runtime"
version = ">=3.11"
install = "echo 'Python 3.9.2' > {dir}/state/python3"
check = "cat {dir}/state/python3"
"#,
  );

  env
    .converge_cmd()
    .args(["--max-cycles", "1"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("python3 is still at 3.9.2 (wanted >=3.11) after 1 cycle"));
}

#[test]
fn action_timeout_flag() {
  let env = TestEnv::with_manifest(
    r#"
[[tool]]
name = "slow"
kind = "runtime"
install = "sleep 5"
check = "exit 1"
"#,
  );

  env
    .converge_cmd()
    .args(["--timeout", "200ms", "--max-retries", "0"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("timed out after 200ms"));
}

#[test]
fn worker_pool_mode_converges() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);

  env
    .converge_cmd()
    .args(["--concurrency", "4"])
    .assert()
    .success();

  assert_eq!(env.read("order"), "node\nyq\n");
}

#[test]
fn held_lock_blocks_run() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);
  let _held = EnvLock::acquire(
    &env.lock_dir().join(LOCK_FILENAME),
    LockMode::Exclusive,
    "converge",
    "other.toml",
  )
  .unwrap();

  env
    .converge_cmd()
    .assert()
    .code(1)
    .stderr(predicate::str::contains("environment is locked by another process"))
    .stderr(predicate::str::contains("other.toml"));

  assert!(!env.state("node").exists());
}

#[test]
fn lock_file_flag_overrides_lock_dir() {
  let env = TestEnv::with_manifest(NODE_AND_YQ);
  let lock_file = env.root().join("custom.lock");

  env.converge_cmd().arg("--lock-file").arg(&lock_file).assert().success();

  assert!(lock_file.exists());
}

#[test]
fn ctrl_c_lets_running_install_finish() {
  let env = TestEnv::with_manifest(
    r#"
[[tool]]
name = "slowtool"
kind = "runtime"
install = "touch {dir}/started; sleep 2; echo 1.0.0 > {dir}/state/slowtool"
check = "cat {dir}/state/slowtool"

[[tool]]
name = "after"
kind = "runtime"
depends_on = ["slowtool"]
install = "echo 1.0.0 > {dir}/state/after"
check = "cat {dir}/state/after"
"#,
  );

  // Own process group, like a shell job, so the group signal stands in for
  // a terminal Ctrl-C without reaching the test harness.
  let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_converge"))
    .env("CONVERGE_LOCK_DIR", env.lock_dir())
    .env_remove("RUST_LOG")
    .arg("--manifest")
    .arg(&env.manifest_path)
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0)
    .spawn()
    .unwrap();

  let deadline = Instant::now() + Duration::from_secs(20);
  while !env.root().join("started").exists() {
    assert!(Instant::now() < deadline, "install never started");
    std::thread::sleep(Duration::from_millis(20));
  }

  let pgid = Pid::from_raw(child.id() as i32).unwrap();
  kill_process_group(pgid, Signal::INT).unwrap();

  let output = child.wait_with_output().unwrap();
  let stderr = String::from_utf8_lossy(&output.stderr);

  assert_eq!(output.status.code(), Some(130), "stderr: {stderr}");
  assert!(stderr.contains("Cancelled after 1 action"), "stderr: {stderr}");
  assert_eq!(env.read("state/slowtool"), "1.0.0\n");
  assert!(!env.state("after").exists());
}
