//! Runtime configuration, read once from the environment at startup.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Name the dispatcher answers to when invoked directly rather than via a symlink.
pub const MYNAME: &str = "futility";

/// Directory (relative to the directory holding the dispatcher executable)
/// where legacy standalone binaries live.
pub const SUBDIR: &str = "old_bins";

/// Shared append-only usage log.
pub(crate) const DEFAULT_LOGFILE: &str = "/tmp/futility.log";

/// Environment variable overriding [`DEFAULT_LOGFILE`]; empty disables logging.
pub const LOGFILE_ENV: &str = "FUTILITY_LOG";

/// How long to wait before retrying a log open that failed with a permission error.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settings for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Usage log path; `None` if usage logging is disabled.
    pub log_path: Option<PathBuf>,
    /// Delay before the single retry of a failed log open.
    pub log_retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: Some(PathBuf::from(DEFAULT_LOGFILE)),
            log_retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_logfile_var(std::env::var_os(LOGFILE_ENV))
    }

    fn from_logfile_var(v: Option<OsString>) -> Self {
        let mut r = Self::default();
        match v {
            Some(v) if v.is_empty() => r.log_path = None,
            Some(v) => r.log_path = Some(PathBuf::from(v)),
            None => {}
        }
        r
    }
}
