//! Binary download.
//!
//! Downloads an executable, optionally verifies its SHA256, and places it at
//! its destination with the executable bit set. The file is written next to
//! the destination first and renamed into place, so a failed download never
//! leaves a truncated binary behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::execute::types::{ExecuteError, StepOutput};

/// Download `url` to `dest`.
///
/// When `expected_sha256` is set and `dest` already holds a file with that
/// hash, the download is skipped.
pub async fn execute_fetch(url: &str, expected_sha256: Option<&str>, dest: &Path) -> Result<StepOutput, ExecuteError> {
  info!(url = %url, dest = ?dest, "fetching URL");

  if let Some(expected) = expected_sha256
    && dest.exists()
  {
    debug!(path = ?dest, "checking existing file");
    if let Ok(actual) = hash_file(dest).await {
      if actual == expected {
        info!(path = ?dest, "existing file matches, skipping download");
        return Ok(StepOutput {
          exit_code: None,
          output: format!("{} already up to date", dest.display()),
        });
      }
      debug!(expected = %expected, actual = %actual, "existing file hash mismatch, re-downloading");
    }
  }

  let response = reqwest::get(url).await.map_err(|e| fetch_error(url, &e))?;

  let status = response.status();
  if !status.is_success() {
    return Err(ExecuteError::FetchFailed {
      url: url.to_string(),
      message: format!("HTTP {status}"),
      transient: is_transient_status(status),
    });
  }

  let bytes = response.bytes().await.map_err(|e| fetch_error(url, &e))?;

  let actual_hash = hex::encode(Sha256::digest(&bytes));

  if let Some(expected) = expected_sha256
    && actual_hash != expected
  {
    return Err(ExecuteError::HashMismatch {
      url: url.to_string(),
      expected: expected.to_string(),
      actual: actual_hash,
    });
  }

  let parent = dest_parent(dest)?;
  fs::create_dir_all(&parent).await?;

  let dest_owned = dest.to_path_buf();
  let size = bytes.len();
  tokio::task::spawn_blocking(move || install_file(&parent, &dest_owned, &bytes))
    .await
    .map_err(std::io::Error::other)??;

  info!(path = ?dest, size, sha256 = %actual_hash, "download complete");

  Ok(StepOutput {
    exit_code: None,
    output: format!("downloaded {size} bytes to {} (sha256 {actual_hash})", dest.display()),
  })
}

fn dest_parent(dest: &Path) -> Result<PathBuf, ExecuteError> {
  match dest.parent() {
    Some(p) if !p.as_os_str().is_empty() => Ok(p.to_path_buf()),
    Some(_) => Ok(PathBuf::from(".")),
    None => Err(ExecuteError::Io(std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      format!("destination {} has no parent directory", dest.display()),
    ))),
  }
}

/// Write `bytes` to a temp file in `dir`, mark it executable and rename it
/// over `dest`.
fn install_file(dir: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
  let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
  tmp.write_all(bytes)?;
  tmp.flush()?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o755))?;
  }

  tmp.persist(dest).map_err(|e| e.error)?;
  Ok(())
}

fn fetch_error(url: &str, err: &reqwest::Error) -> ExecuteError {
  let transient = err.is_connect()
    || err.is_timeout()
    || err.is_request()
    || err.is_body()
    || err.status().is_some_and(is_transient_status);
  ExecuteError::FetchFailed {
    url: url.to_string(),
    message: err.to_string(),
    transient,
  }
}

/// Server errors and throttling are worth retrying; other client errors are
/// not.
fn is_transient_status(status: StatusCode) -> bool {
  status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT
}

/// Compute SHA256 hash of a file.
async fn hash_file(path: &Path) -> Result<String, std::io::Error> {
  let bytes = fs::read(path).await?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}
