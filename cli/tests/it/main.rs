//! Process-level tests driving the real `futility` binary through symlinks.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};
use fn_error_context::context;
use tempfile::TempDir;

const FUTILITY: &str = env!("CARGO_BIN_EXE_futility");

/// Used as the legacy binary in tests; `sh -c` lets us observe argv and env.
const SH: &str = "/bin/sh";

/// A scratch installation: `dir/futility`, `dir/old_bins/`, and a usage log.
struct Fixture {
    _td: TempDir,
    dir: PathBuf,
    log: PathBuf,
}

impl Fixture {
    #[context("Creating fixture")]
    fn new() -> Result<Self> {
        // Same filesystem as the build output, so we can hard link
        let td = tempfile::tempdir_in(env!("CARGO_TARGET_TMPDIR"))?;
        // Our own path is reported fully resolved
        let dir = td.path().canonicalize()?;
        let exe = dir.join("futility");
        // A hard link rather than a copy; a freshly written executable can
        // hit ETXTBSY when other test threads fork concurrently.
        if std::fs::hard_link(FUTILITY, &exe).is_err() {
            std::fs::copy(FUTILITY, &exe)?;
        }
        std::fs::create_dir(dir.join("old_bins"))?;
        let log = dir.join("futility.log");
        Ok(Self { _td: td, dir, log })
    }

    /// Install a symlink to the dispatcher under `name`.
    fn link(&self, name: &str) -> Result<PathBuf> {
        let p = self.dir.join(name);
        std::os::unix::fs::symlink("futility", &p).with_context(|| format!("Linking {name}"))?;
        Ok(p)
    }

    /// Install a legacy binary under `name`.
    fn legacy(&self, name: &str, target: impl AsRef<Path>) -> Result<()> {
        std::os::unix::fs::symlink(target, self.dir.join("old_bins").join(name))?;
        Ok(())
    }

    fn command(&self, argv0: impl AsRef<OsStr>) -> Command {
        let mut c = Command::new(argv0);
        c.env("FUTILITY_LOG", &self.log)
            .env_remove("RUST_LOG")
            .stdin(Stdio::null());
        c
    }

    fn log_contents(&self) -> Result<String> {
        std::fs::read_to_string(&self.log).context("Reading usage log")
    }
}

fn stdout(o: &Output) -> &str {
    std::str::from_utf8(&o.stdout).unwrap()
}

fn stderr(o: &Output) -> &str {
    std::str::from_utf8(&o.stderr).unwrap()
}

/// Run `program` with a literal `envp`, byte for byte, and stdout sent to `out`.
///
/// `Command` normalizes the environment (no duplicates, every entry has `=`),
/// so this goes through fork and execve directly. Returns the exit status.
#[allow(unsafe_code)]
#[context("Running {} with a raw environment", program.display())]
fn run_with_raw_env(program: &Path, envp: &[&str], out: &File) -> Result<i32> {
    let path = CString::new(program.as_os_str().as_bytes())?;
    let argv = [path.as_ptr(), std::ptr::null()];
    let env = envp
        .iter()
        .map(|e| CString::new(*e))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut env_ptrs: Vec<*const libc::c_char> = env.iter().map(|e| e.as_ptr()).collect();
    env_ptrs.push(std::ptr::null());
    let out_fd = out.as_raw_fd();
    // Everything the child needs is allocated up front; between fork and
    // execve only async-signal-safe calls are made.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if pid == 0 {
        unsafe {
            libc::dup2(out_fd, libc::STDOUT_FILENO);
            libc::execve(path.as_ptr(), argv.as_ptr(), env_ptrs.as_ptr());
            libc::_exit(127);
        }
    }
    let mut status = 0;
    loop {
        let r = unsafe { libc::waitpid(pid, &mut status, 0) };
        if r == pid {
            break;
        }
        let e = std::io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::EINTR) {
            return Err(e.into());
        }
    }
    anyhow::ensure!(libc::WIFEXITED(status), "abnormal exit: {status}");
    Ok(libc::WEXITSTATUS(status))
}

/// Split a usage log into records of arguments, skipping caller lines.
fn parse_records(log: &str) -> Vec<Vec<&str>> {
    let mut r: Vec<Vec<&str>> = Vec::new();
    for line in log.lines() {
        match line {
            "##### HEY #####" => r.push(Vec::new()),
            l if l.starts_with("CALLER:") => {}
            l => r.last_mut().expect("record delimiter").push(l),
        }
    }
    r
}

#[test]
fn test_direct_no_args() -> Result<()> {
    let fixture = Fixture::new()?;
    let o = fixture.command(fixture.dir.join("futility")).output()?;
    assert_eq!(o.status.code(), Some(1));
    assert!(stderr(&o).starts_with("\nUsage: futility PROGRAM|COMMAND [args...]\n"));
    assert_eq!(stdout(&o), "");
    // Still logged
    assert_eq!(
        parse_records(&fixture.log_contents()?),
        vec![vec![fixture.dir.join("futility").to_str().unwrap()]]
    );
    Ok(())
}

#[test]
fn test_direct_help() -> Result<()> {
    let fixture = Fixture::new()?;
    let o = fixture
        .command(fixture.dir.join("futility"))
        .args(["help", "extra", ""])
        .output()?;
    assert_eq!(o.status.code(), Some(0));
    let out = stdout(&o);
    assert!(out.starts_with("\nUsage: futility"));
    let tail = out
        .split_once("The following commands are built-in:\n")
        .unwrap()
        .1;
    similar_asserts::assert_eq!(
        tail,
        "  help                 Show a bit of help\n\
         \n\
         FYI, you added these args that I'm ignoring:\n\
         argv[0] = help\n\
         argv[1] = extra\n\
         argv[2] = \n"
    );
    assert_eq!(stderr(&o), "");
    Ok(())
}

#[test]
fn test_builtin_precedence() -> Result<()> {
    let fixture = Fixture::new()?;
    let help = fixture.link("help")?;
    // A like-named legacy binary is never consulted
    fixture.legacy("help", SH)?;
    for _ in 0..2 {
        let o = fixture.command(&help).args(["-c", "echo legacy"]).output()?;
        assert_eq!(o.status.code(), Some(0));
        assert!(stdout(&o).contains("The following commands are built-in:"));
        assert!(stdout(&o).contains(&format!("argv[0] = {}\n", help.display())));
        assert!(!stdout(&o).contains("\nlegacy\n"));
    }
    Ok(())
}

#[test]
fn test_legacy_delegation() -> Result<()> {
    let fixture = Fixture::new()?;
    let tool = fixture.link("vbutil_kernel")?;
    fixture.legacy("vbutil_kernel", SH)?;
    let script = r#"printf '%s\n' "$0" "$@" "$FUTILITY_TEST_VAR""#;
    let o = fixture
        .command(&tool)
        .args(["-c", script, "zero", "one", "two words", ""])
        .env("FUTILITY_TEST_VAR", "passed through")
        .output()?;
    assert_eq!(stderr(&o), "");
    assert_eq!(o.status.code(), Some(0));
    similar_asserts::assert_eq!(stdout(&o), "zero\none\ntwo words\n\npassed through\n");

    let records = fixture.log_contents()?;
    let expected_first = tool.to_str().unwrap();
    assert_eq!(
        parse_records(&records),
        vec![vec![expected_first, "-c", script, "zero", "one", "two words", "(EMPTY)"]]
    );
    Ok(())
}

#[test]
fn test_legacy_raw_environment() -> Result<()> {
    let fixture = Fixture::new()?;
    // Named after the legacy binary so even multi-call coreutils accept it
    let tool = fixture.link("env")?;
    let env_bin = ["/usr/bin/env", "/bin/env"]
        .into_iter()
        .find(|p| Path::new(p).exists())
        .context("No env binary")?;
    fixture.legacy("env", env_bin)?;
    // Duplicate keys and an entry without '=' are not representable via Command
    let envp = ["A=1", "A=2", "NOEQUALS", "FUTILITY_LOG="];
    let outpath = fixture.dir.join("env.out");
    let out = File::create(&outpath)?;
    let code = run_with_raw_env(&tool, &envp, &out)?;
    drop(out);
    assert_eq!(code, 0);
    similar_asserts::assert_eq!(
        std::fs::read_to_string(&outpath)?,
        "A=1\nA=2\nNOEQUALS\nFUTILITY_LOG=\n"
    );
    // An empty FUTILITY_LOG disables the usage log
    assert!(!fixture.log.exists());
    Ok(())
}

#[test]
fn test_legacy_direct() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.legacy("dev_sign_file", SH)?;
    let o = fixture
        .command(fixture.dir.join("futility"))
        .args(["dev_sign_file", "-c", "exit 7"])
        .output()?;
    assert_eq!(o.status.code(), Some(7));
    Ok(())
}

#[test]
fn test_legacy_missing() -> Result<()> {
    let fixture = Fixture::new()?;
    let tool = fixture.link("vbutil_firmware")?;
    let o = fixture.command(&tool).arg("--verify").output()?;
    assert_eq!(o.status.code(), Some(1));
    assert_eq!(stdout(&o), "");
    let expected = format!(
        "futility failed to exec {}: ",
        fixture.dir.join("old_bins/vbutil_firmware").display()
    );
    assert!(stderr(&o).starts_with(&expected), "{}", stderr(&o));
    assert!(stderr(&o).contains("No such file or directory"));
    Ok(())
}

#[test]
fn test_logging_disabled_or_broken() -> Result<()> {
    let fixture = Fixture::new()?;
    let help = fixture.link("help")?;
    let o = fixture.command(&help).env("FUTILITY_LOG", "").output()?;
    assert_eq!(o.status.code(), Some(0));
    assert!(!fixture.log.exists());

    // Unopenable logs never affect the command
    let o = fixture
        .command(&help)
        .env("FUTILITY_LOG", fixture.dir.join("missing/dir/futility.log"))
        .output()?;
    assert_eq!(o.status.code(), Some(0));
    assert_eq!(stderr(&o), "");
    Ok(())
}

#[test]
fn test_concurrent_logging() -> Result<()> {
    const PROCS: usize = 8;
    const ARGS: usize = 100;
    let fixture = Fixture::new()?;
    let help = fixture.link("help")?;
    let children = (0..PROCS)
        .map(|p| {
            fixture
                .command(&help)
                .args((0..ARGS).map(|i| format!("p{p}-{i}")))
                .stdout(Stdio::null())
                .spawn()
        })
        .collect::<std::io::Result<Vec<_>>>()?;
    for mut child in children {
        assert!(child.wait()?.success());
    }

    let log = fixture.log_contents()?;
    let records = parse_records(&log);
    assert_eq!(records.len(), PROCS);
    let mut procs = Vec::new();
    for record in records {
        assert_eq!(record.len(), ARGS + 1);
        assert_eq!(record[0], help.to_str().unwrap());
        let (p, _) = record[1].split_once('-').unwrap();
        for (i, arg) in record[1..].iter().enumerate() {
            assert_eq!(*arg, format!("{p}-{i}"));
        }
        procs.push(p.to_owned());
    }
    procs.sort();
    procs.dedup();
    assert_eq!(procs.len(), PROCS);
    Ok(())
}
