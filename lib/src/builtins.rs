//! Commands implemented directly by the dispatcher.

use std::ffi::OsString;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;

use anyhow::Result;
use indoc::indoc;

use crate::registry::Registry;

/// Shown by `help` and, on standard error, for a bare direct invocation.
pub(crate) const USAGE: &str = indoc! {r#"

    Usage: futility PROGRAM|COMMAND [args...]

    This is the unified firmware utility, which will eventually replace
    all the distinct userspace tools formerly produced by the
    vboot_reference package.

    When symlinked under the name of one of those previous tools, it can
    do one of two things: either it will fully implement the original
    behavior, or (until that functionality is complete) it will just exec
    the original binary.

    In either case it may also record some usage information in /tmp to
    help improve coverage and correctness.

    If you invoke it directly instead of via a symlink, it requires one
    argument, which is the name of the old binary to exec. That binary
    must be located in a directory named "old_bins" underneath
    the futility executable.

"#};

fn write_help(registry: &Registry, argv: &[OsString], mut out: impl Write) -> Result<()> {
    out.write_all(USAGE.as_bytes())?;
    writeln!(out, "The following commands are built-in:")?;
    for cmd in registry.iter() {
        writeln!(out, "  {:<20} {}", cmd.name, cmd.short_help)?;
    }
    writeln!(out)?;
    writeln!(out, "FYI, you added these args that I'm ignoring:")?;
    for (i, arg) in argv.iter().enumerate() {
        write!(out, "argv[{i}] = ")?;
        out.write_all(arg.as_bytes())?;
        writeln!(out)?;
    }
    Ok(())
}

/// `help`: describe the dispatcher and list the commands of the registry
/// it was dispatched from.
pub(crate) fn help(registry: &Registry, argv: &[OsString]) -> Result<i32> {
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    write_help(registry, argv, &mut stdout)?;
    stdout.flush()?;
    Ok(0)
}
