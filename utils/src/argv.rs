use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

/// Return everything after the final `/` of an argument, or the whole
/// argument if it has none.
///
/// Unlike [`std::path::Path::file_name`] this does no normalization: a
/// trailing slash yields an empty name and `..` is returned as-is.
pub fn argv_basename(arg: &OsStr) -> &OsStr {
    let bytes = arg.as_bytes();
    match bytes.iter().rposition(|&b| b == b'/') {
        Some(i) => OsStr::from_bytes(&bytes[i + 1..]),
        None => arg,
    }
}
