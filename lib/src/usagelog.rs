//! # Shared usage log
//!
//! Every invocation appends a small record of how it was called to a single
//! world-writable file. Many invocations may run at once (e.g. from a build
//! script fanning out over images), so each record is written while holding
//! a whole-file `flock(2)` exclusive lock. The lock is only held for the few
//! writes that make up one record and is always released before the command
//! itself runs.
//!
//! Logging is strictly best-effort: nothing in here can fail the invocation.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use fn_error_context::context;
use rustix::fs::{FlockOperation, Mode};

use crate::config::Config;

/// First line of every record.
pub(crate) const DELIMITER: &str = "##### HEY #####";
/// Prefix for the line naming the parent process executable.
pub(crate) const CALLER_PREFIX: &str = "CALLER:";
const EMPTY_PLACEHOLDER: &[u8] = b"(EMPTY)";
const NULL_PLACEHOLDER: &[u8] = b"(NULL)";

const LOGFILE_MODE: u32 = 0o666;

/// An open usage log holding the exclusive lock.
///
/// Dropping this unlocks and closes the file.
#[derive(Debug)]
pub(crate) struct UsageLog {
    file: File,
}

fn open_log(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .mode(LOGFILE_MODE)
        .open(path)
}

/// Open with `open`, retrying once after `retry_delay` if that fails with a
/// permission error, since the file may be in the middle of being created by
/// someone else. Other errors are returned at once.
fn open_with_retry(
    path: &Path,
    retry_delay: Duration,
    open: impl Fn(&Path) -> std::io::Result<File>,
) -> std::io::Result<File> {
    match open(path) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            tracing::debug!("Retrying usage log open: {e}");
            std::thread::sleep(retry_delay);
            open(path)
        }
        r => r,
    }
}

/// Blocking exclusive lock on the whole file.
fn lock_exclusive(f: &File) -> rustix::io::Result<()> {
    loop {
        match rustix::fs::flock(f, FlockOperation::LockExclusive) {
            Err(rustix::io::Errno::INTR) => continue,
            r => return r,
        }
    }
}

impl UsageLog {
    /// Open the log for appending and wait for our turn at the lock.
    #[context("Opening usage log {}", path.display())]
    pub(crate) fn acquire(path: &Path, retry_delay: Duration) -> Result<Self> {
        let file = open_with_retry(path, retry_delay, open_log)?;
        // Let anyone have a turn; this only works if we created it.
        if let Err(e) = rustix::fs::fchmod(&file, Mode::from_raw_mode(LOGFILE_MODE)) {
            tracing::debug!("Unable to chmod usage log: {e}");
        }
        // But only one at a time
        lock_exclusive(&file)?;
        Ok(Self { file })
    }

    /// Append one line. Empty and absent values are written as placeholders
    /// so that every line of a record is non-empty.
    pub(crate) fn write_line(&mut self, line: Option<&OsStr>) -> std::io::Result<()> {
        let buf = render_line(line);
        self.file.write_all(&buf)
    }

    /// Write a full record: delimiter, caller (if known), then each argument.
    pub(crate) fn write_record(&mut self, argv: &[OsString]) -> std::io::Result<()> {
        self.write_line(Some(OsStr::new(DELIMITER)))?;
        if let Some(caller) = caller_line() {
            self.write_line(Some(&caller))?;
        }
        for arg in argv {
            self.write_line(Some(arg))?;
        }
        Ok(())
    }
}

impl Drop for UsageLog {
    fn drop(&mut self) {
        // Closing would drop the lock too, but be explicit about it.
        if let Err(e) = rustix::fs::flock(&self.file, FlockOperation::Unlock) {
            tracing::debug!("Unable to unlock usage log: {e}");
        }
    }
}

fn render_line(line: Option<&OsStr>) -> Vec<u8> {
    let bytes = match line.map(|s| s.as_bytes()) {
        None => NULL_PLACEHOLDER,
        Some([]) => EMPTY_PLACEHOLDER,
        Some(b) => b,
    };
    let mut buf = Vec::with_capacity(bytes.len() + 1);
    buf.extend_from_slice(bytes);
    buf.push(b'\n');
    buf
}

/// Compose the caller line from a parent executable path.
fn format_caller(exe: &Path) -> OsString {
    let mut line = OsString::from(CALLER_PREFIX);
    line.push(exe);
    line
}

/// Who ran us, if the platform can tell.
fn caller_line() -> Option<OsString> {
    let parent = rustix::process::getppid()?;
    let link = format!("/proc/{}/exe", parent.as_raw_nonzero());
    let exe = std::fs::read_link(link).ok()?;
    Some(format_caller(&exe))
}

/// Append a record of this invocation to the configured usage log.
///
/// The lock is released before this returns. All failures are swallowed.
pub(crate) fn record_invocation(config: &Config, argv: &[OsString]) {
    let Some(path) = config.log_path.as_deref() else {
        return;
    };
    let mut log = match UsageLog::acquire(path, config.log_retry_delay) {
        Ok(log) => log,
        Err(e) => {
            tracing::debug!("Skipping usage log: {e:#}");
            return;
        }
    };
    if let Err(e) = log.write_record(argv) {
        tracing::debug!("Writing usage log {}: {e}", path.display());
    }
}
