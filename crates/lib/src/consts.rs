use std::time::Duration;

pub const APP_NAME: &str = "converge";

/// Name of the lock file guarding an environment.
pub const LOCK_FILENAME: &str = "converge.lock";

/// Overrides the directory holding the lock file.
pub const LOCK_DIR_ENV: &str = "CONVERGE_LOCK_DIR";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CYCLES: u32 = 3;
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);
pub const DEFAULT_BIN_DIR: &str = "/usr/local/bin";
