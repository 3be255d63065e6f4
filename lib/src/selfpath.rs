//! Locating the running executable, and from it the directory of legacy
//! binaries that are delegated to.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The kernel's view of which file we are executing.
const PROC_SELF_EXE: &str = "/proc/self/exe";

/// Failure to determine our own executable path.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A lookup of the given path failed.
    #[error("{}: {source}", .path.display())]
    Lookup {
        /// What we tried to read or canonicalize.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// There is no `/proc/self/exe` and `argv[0]` is a bare name missing from `$PATH`.
    #[error("$PATH/{}: {source}", .name.to_string_lossy())]
    NotInPath {
        /// The bare `argv[0]`.
        name: OsString,
        /// Always `ENOENT`.
        source: std::io::Error,
    },
}

/// Failure to compose a legacy binary path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LegacyPathError {
    /// Our own path has no directory component.
    #[error("{} doesn't make sense", .path.display())]
    NoDirectory {
        /// The path as resolved.
        path: PathBuf,
    },
    /// The composed path could not exist on this system.
    #[error("legacy path of {len} bytes exceeds PATH_MAX ({max})")]
    TooLong {
        /// Length of the composed path, without the terminating NUL.
        len: usize,
        /// The platform limit, including the terminating NUL.
        max: usize,
    },
}

/// Determine the canonical path of the running executable.
///
/// Uses `/proc/self/exe`. On systems without procfs, falls back to `argv[0]`:
/// a path containing `/` is canonicalized (following symlinks), while a bare
/// name is searched for in `$PATH` the way a shell would have found it.
pub fn resolve_self_path(argv0: &OsStr) -> Result<PathBuf, ResolveError> {
    let path_env = std::env::var_os("PATH");
    resolve_via(Path::new(PROC_SELF_EXE), argv0, path_env.as_deref())
}

fn resolve_via(
    link: &Path,
    argv0: &OsStr,
    path_env: Option<&OsStr>,
) -> Result<PathBuf, ResolveError> {
    match std::fs::read_link(link) {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {}, resolving {argv0:?}", link.display());
            resolve_argv0(argv0, path_env)
        }
        Err(source) => Err(ResolveError::Lookup {
            path: link.to_owned(),
            source,
        }),
    }
}

fn canonicalize(p: &Path) -> Result<PathBuf, ResolveError> {
    p.canonicalize().map_err(|source| ResolveError::Lookup {
        path: p.to_owned(),
        source,
    })
}

fn is_executable_file(p: &Path) -> bool {
    std::fs::metadata(p)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn resolve_argv0(argv0: &OsStr, path_env: Option<&OsStr>) -> Result<PathBuf, ResolveError> {
    if argv0.as_bytes().contains(&b'/') {
        return canonicalize(Path::new(argv0));
    }
    let path_env = path_env.unwrap_or_default();
    for dir in std::env::split_paths(path_env) {
        // An empty entry is the current directory
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        let candidate = dir.join(argv0);
        if is_executable_file(&candidate) {
            return canonicalize(&candidate);
        }
    }
    Err(ResolveError::NotInPath {
        name: argv0.to_owned(),
        source: std::io::Error::from_raw_os_error(libc::ENOENT),
    })
}

/// Where the legacy binary for an invoked name lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyBinaryLocation {
    /// Canonical path of the running dispatcher.
    pub self_exe: PathBuf,
    /// Subdirectory next to the dispatcher holding legacy binaries.
    pub subdir: &'static str,
    /// `dirname(self_exe)/subdir/name`.
    pub resolved: PathBuf,
}

impl LegacyBinaryLocation {
    /// Compose the legacy path for `name`. No filesystem access is performed.
    ///
    /// Fails rather than truncating if the result would not fit in `PATH_MAX`,
    /// since such a path cannot name a file anyway.
    pub fn derive(
        self_exe: PathBuf,
        subdir: &'static str,
        name: &OsStr,
    ) -> Result<Self, LegacyPathError> {
        let exe = self_exe.as_os_str().as_bytes();
        let Some(slash) = exe.iter().rposition(|&b| b == b'/') else {
            return Err(LegacyPathError::NoDirectory { path: self_exe });
        };
        let dir = &exe[..slash];
        let name = name.as_bytes();
        let len = dir.len() + 1 + subdir.len() + 1 + name.len();
        let max = libc::PATH_MAX as usize;
        // Leave room for the NUL that execve() needs
        if len >= max {
            return Err(LegacyPathError::TooLong { len, max });
        }
        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(dir);
        buf.push(b'/');
        buf.extend_from_slice(subdir.as_bytes());
        buf.push(b'/');
        buf.extend_from_slice(name);
        debug_assert_eq!(buf.len(), len);
        Ok(Self {
            self_exe,
            subdir,
            resolved: PathBuf::from(OsString::from_vec(buf)),
        })
    }
}
