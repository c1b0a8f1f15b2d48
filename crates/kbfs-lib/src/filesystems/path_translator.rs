use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::trace;

use super::error::{FsError, FsResult};

/// The client path naming the root of the mounted namespace.
pub const CLIENT_ROOT: &str = "/";

/// Translate a client path into the real path under `backing_root`.
///
/// This is plain byte concatenation: no normalization, no symlink
/// resolution and no existence check. `translate("/tmp/fusefs", "/a/b")`
/// is `/tmp/fusefs/a/b`, and `..` segments are passed through verbatim.
pub fn translate(backing_root: &Path, client_path: &Path) -> PathBuf {
    let root = backing_root.as_os_str();
    let client = client_path.as_os_str();

    let mut real = OsString::with_capacity(root.len() + client.len());
    real.push(root);
    real.push(client);

    trace!("Translating client path {:?} to real path {:?}", client_path, real);
    PathBuf::from(real)
}

/// Build the client path of `name` inside the directory `parent`.
///
/// Names the kernel hands us for a single directory entry must be one
/// component; `.`, `..`, empty names and names containing `/` are rejected
/// so a client path never climbs out of the backing root.
pub fn child_path(parent: &Path, name: &OsStr) -> FsResult<PathBuf> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes == b"." || bytes == b".." || bytes.contains(&b'/') {
        return Err(FsError::InvalidName(PathBuf::from(name)));
    }

    let mut path = OsString::with_capacity(parent.as_os_str().len() + bytes.len() + 1);
    path.push(parent.as_os_str());
    if !parent.as_os_str().as_bytes().ends_with(b"/") {
        path.push("/");
    }
    path.push(name);
    Ok(PathBuf::from(path))
}
