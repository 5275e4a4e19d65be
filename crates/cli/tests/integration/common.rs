//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the manifest, the
/// lock directory, and the state files written by install scripts.
pub struct TestEnv {
  pub temp: TempDir,
  pub manifest_path: PathBuf,
}

impl TestEnv {
  /// Create an environment with `manifest` written to `tools.toml`.
  ///
  /// `{dir}` in the manifest is replaced with the canonical temp path, so
  /// install and check scripts can keep their state inside it.
  pub fn with_manifest(manifest: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("tools.toml");
    let env = Self { temp, manifest_path };
    std::fs::create_dir_all(env.root().join("state")).unwrap();
    let content = manifest.replace("{dir}", &env.root().display().to_string());
    std::fs::write(&env.manifest_path, content).unwrap();
    env
  }

  /// Canonical temp directory.
  pub fn root(&self) -> PathBuf {
    let p = self.temp.path().to_path_buf();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Lock directory (isolated per test).
  pub fn lock_dir(&self) -> PathBuf {
    let p = self.temp.path().join("lock");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// State file written by a tool's install script.
  pub fn state(&self, tool: &str) -> PathBuf {
    self.root().join("state").join(tool)
  }

  /// Read a file relative to the temp directory, empty if absent.
  pub fn read(&self, relative_path: &str) -> String {
    std::fs::read_to_string(self.root().join(relative_path)).unwrap_or_default()
  }

  /// Get a pre-configured Command for the converge binary.
  ///
  /// Sets `CONVERGE_LOCK_DIR` to an isolated lock directory and points
  /// `--manifest` at the test manifest.
  pub fn converge_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("converge");
    cmd.env("CONVERGE_LOCK_DIR", self.lock_dir());
    cmd.env_remove("RUST_LOG");
    cmd.arg("--manifest").arg(&self.manifest_path);
    cmd
  }
}
