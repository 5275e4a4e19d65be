//! File-based environment locking for mutual exclusion.
//!
//! Only one provisioning run may mutate an environment at a time. Runs that
//! only look (dry runs) take a shared lock, so they can overlap each other
//! but not a mutating run.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Written into the lock file by the exclusive holder.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  /// Manifest being applied, or `-` for stdin.
  pub manifest: String,
}

#[derive(Debug, Error)]
pub enum EnvLockError {
  #[error(
    "environment is locked by another process: {command} (PID {pid}, manifest {manifest}, started {started_at})\n\
             If you're sure no converge process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    manifest: String,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "environment is locked (could not read lock metadata)\n\
             If you're sure no converge process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

impl EnvLockError {
  pub fn is_contention(&self) -> bool {
    matches!(
      self,
      EnvLockError::Contention { .. } | EnvLockError::ContentionUnknown { .. }
    )
  }
}

/// Held lock on an environment. Released on drop.
#[derive(Debug)]
pub struct EnvLock {
  file: File,
  lock_path: PathBuf,
  mode: LockMode,
}

impl EnvLock {
  /// Take the lock at `lock_path` without blocking.
  ///
  /// An exclusive holder records who it is, so a contending run can name
  /// it in the error.
  pub fn acquire(lock_path: &Path, mode: LockMode, command: &str, manifest: &str) -> Result<Self, EnvLockError> {
    if let Some(dir) = lock_path.parent()
      && !dir.as_os_str().is_empty()
      && !dir.exists()
    {
      std::fs::create_dir_all(dir).map_err(EnvLockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(lock_path)
      .map_err(EnvLockError::OpenFile)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(lock_path));
      }
      return Err(EnvLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      Self::write_metadata(&file, command, manifest)?;
    }

    debug!(path = ?lock_path, mode = ?mode, "acquired environment lock");

    Ok(EnvLock {
      file,
      lock_path: lock_path.to_path_buf(),
      mode,
    })
  }

  /// Reads the lock metadata through the held file handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn write_metadata(file: &File, command: &str, manifest: &str) -> Result<(), EnvLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      manifest: manifest.to_string(),
    };

    file.set_len(0).map_err(EnvLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| EnvLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(EnvLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> EnvLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        let started = UNIX_EPOCH + std::time::Duration::from_secs(metadata.started_at_unix);

        return EnvLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          manifest: metadata.manifest,
          started_at: humantime::format_rfc3339_seconds(started).to_string(),
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    EnvLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: OVERLAPPED is valid when zero-initialized and the handle is
  // owned by `file` for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
