use crate::consts::{APP_NAME, LOCK_DIR_ENV, LOCK_FILENAME};
use std::path::PathBuf;

/// Directory holding the environment lock file.
///
/// `CONVERGE_LOCK_DIR` wins. Otherwise a system-wide directory when running
/// elevated, so every root invocation contends on the same lock, and the
/// user's runtime directory when not.
pub fn lock_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(LOCK_DIR_ENV)
    && !dir.is_empty()
  {
    return PathBuf::from(dir);
  }

  if super::is_elevated() {
    return system_lock_dir();
  }

  runtime_dir().join(APP_NAME)
}

/// Default path of the environment lock file.
pub fn default_lock_path() -> PathBuf {
  lock_dir().join(LOCK_FILENAME)
}

#[cfg(windows)]
fn system_lock_dir() -> PathBuf {
  let program_data = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
  PathBuf::from(program_data).join(APP_NAME)
}

#[cfg(not(windows))]
fn system_lock_dir() -> PathBuf {
  PathBuf::from("/run").join(APP_NAME)
}

#[cfg(windows)]
fn runtime_dir() -> PathBuf {
  std::env::temp_dir()
}

#[cfg(not(windows))]
fn runtime_dir() -> PathBuf {
  std::env::var("XDG_RUNTIME_DIR")
    .ok()
    .filter(|d| !d.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}
