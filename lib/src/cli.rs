//! # Multi-call dispatch
//!
//! `futility` is installed once and symlinked under the names of the tools
//! it replaces. Each invocation is resolved by the basename of `argv[0]`:
//!
//! - `futility CMD args...` strips its own name and resolves `CMD` instead.
//! - A name in the built-in [`Registry`] runs that handler in-process.
//! - Anything else is handed off to the legacy binary of the same name in
//!   the `old_bins` directory next to the real `futility` executable, by
//!   replacing this process with it.
//!
//! Built-ins always take precedence over a legacy binary of the same name.

use std::ffi::OsString;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use futility_utils::argv_basename;
use thiserror::Error;

use crate::builtins::USAGE;
use crate::config::{Config, MYNAME, SUBDIR};
use crate::registry::{CommandDescriptor, Registry};
use crate::selfpath::{LegacyBinaryLocation, LegacyPathError, ResolveError};

/// Reasons an invocation fails; all of them exit with status 1.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Invoked directly with nothing to run.
    #[error("{}", USAGE)]
    Usage,
    /// Our own executable could not be found, so neither can legacy binaries.
    #[error("{} is lost: {} => {source}", MYNAME, .argv0.to_string_lossy())]
    Resolution {
        /// The argument vector's first element, as we were asked to run it.
        argv0: OsString,
        /// What went wrong.
        source: ResolveError,
    },
    /// Our own path was resolved, but has no directory to look in.
    #[error("{} says {} doesn't make sense", MYNAME, .path.display())]
    NoDirectory {
        /// The path as resolved.
        path: PathBuf,
    },
    /// The legacy binary path could not be composed.
    #[error("{} cannot find legacy binary: {source}", MYNAME)]
    LegacyPath {
        /// What went wrong.
        source: LegacyPathError,
    },
    /// Replacing this process with the legacy binary failed.
    #[error("{} failed to exec {}: {source}", MYNAME, .path.display())]
    Delegation {
        /// The legacy binary we tried to run.
        path: PathBuf,
        /// Error from `execve()`.
        source: std::io::Error,
    },
    /// A built-in command failed outright.
    #[error("error: {0:#}")]
    Builtin(anyhow::Error),
}

/// A single invocation of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Argument vector for the command, without our own name if invoked directly.
    pub argv: Vec<OsString>,
    /// Basename of `argv[0]`.
    pub name: OsString,
    /// Whether we were invoked as `futility CMD ...`.
    pub direct: bool,
}

impl Invocation {
    /// Work out which command is being asked for.
    pub fn resolve(mut argv: Vec<OsString>) -> Result<Self, DispatchError> {
        let first = argv.first().ok_or(DispatchError::Usage)?;
        let mut name = argv_basename(first).to_owned();
        let direct = name == MYNAME;
        if direct {
            // Must have an argument; pass the rest along
            if argv.len() < 2 {
                return Err(DispatchError::Usage);
            }
            argv.remove(0);
            name = argv_basename(&argv[0]).to_owned();
        }
        Ok(Self { argv, name, direct })
    }
}

/// What an invocation will do.
#[derive(Debug)]
pub enum Plan<'r> {
    /// Run this command in-process.
    Builtin(&'r CommandDescriptor),
    /// Replace the process with this binary.
    Legacy(LegacyBinaryLocation),
}

/// Choose between a built-in and a legacy binary. `self_exe` is only
/// called if there is no built-in.
pub fn plan<'r>(
    registry: &'r Registry,
    inv: &Invocation,
    self_exe: impl FnOnce() -> Result<PathBuf, ResolveError>,
) -> Result<Plan<'r>, DispatchError> {
    if let Some(cmd) = registry.lookup(&inv.name) {
        return Ok(Plan::Builtin(cmd));
    }
    let self_exe = self_exe().map_err(|source| DispatchError::Resolution {
        argv0: inv.argv[0].clone(),
        source,
    })?;
    let loc = LegacyBinaryLocation::derive(self_exe, SUBDIR, &inv.name).map_err(|e| match e {
        LegacyPathError::NoDirectory { path } => DispatchError::NoDirectory { path },
        source => DispatchError::LegacyPath { source },
    })?;
    Ok(Plan::Legacy(loc))
}

/// Replace the current process with the legacy binary. Only returns on failure.
///
/// The environment is inherited as-is: `environ` is handed to `execve()`
/// untouched, including duplicate or malformed entries.
fn exec_legacy(inv: &Invocation, loc: &LegacyBinaryLocation) -> DispatchError {
    // Destructors don't run across exec
    if let Err(e) = std::io::stdout().flush() {
        tracing::debug!("Flushing stdout: {e}");
    }
    let mut cmd = Command::new(&loc.resolved);
    cmd.arg0(&inv.argv[0]).args(&inv.argv[1..]);
    DispatchError::Delegation {
        path: loc.resolved.clone(),
        source: cmd.exec(),
    }
}

fn dispatch(registry: &Registry, argv: Vec<OsString>) -> Result<i32, DispatchError> {
    // The self-path fallback wants argv[0] as the kernel saw it, before any shift.
    let orig_argv0 = argv.first().cloned().unwrap_or_default();
    let inv = Invocation::resolve(argv)?;
    tracing::trace!("Resolved {:?} (direct: {})", inv.name, inv.direct);
    match plan(registry, &inv, || {
        crate::selfpath::resolve_self_path(&orig_argv0)
    })? {
        Plan::Builtin(cmd) => {
            tracing::debug!("Running built-in {}", cmd.name);
            (cmd.handler)(registry, &inv.argv).map_err(DispatchError::Builtin)
        }
        Plan::Legacy(loc) => {
            tracing::debug!("Delegating to {}", loc.resolved.display());
            Err(exec_legacy(&inv, &loc))
        }
    }
}

fn report(e: &DispatchError) {
    match e {
        // Already newline-terminated
        DispatchError::Usage => eprint!("{e}"),
        e => eprintln!("{e}"),
    }
}

/// Log the invocation, then dispatch it. Returns the process exit code,
/// unless the process was replaced by a legacy binary.
pub fn run(config: &Config, registry: &Registry, argv: Vec<OsString>) -> i32 {
    crate::usagelog::record_invocation(config, &argv);
    match dispatch(registry, argv) {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            libc::EXIT_FAILURE
        }
    }
}

/// Primary entrypoint, using the process arguments and environment.
pub fn run_from_env() -> i32 {
    let config = Config::from_env();
    let registry = crate::registry::builtin();
    run(&config, &registry, std::env::args_os().collect())
}
