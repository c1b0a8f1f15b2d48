//! The callback table a transport drives.
//!
//! `PathOperations` has one method per filesystem operation the mounted
//! namespace supports. Every method takes client paths (rooted at `/`) and
//! returns the host's own result: the value on success, the host errno in
//! [`FsError::Os`](super::error::FsError::Os) on failure. Symlink and
//! hard-link creation are deliberately absent.

use std::ffi::OsStr;
use std::fs::Metadata;
use std::path::Path;

use fuser::FileType;
use nix::sys::statvfs::Statvfs;
use nix::sys::time::TimeSpec;

use super::error::FsResult;

/// Minimal attributes synthesized for one directory entry.
///
/// `mode` only carries the file-type bits (`d_type << 12`); permission bits
/// are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryAttr {
    pub ino: u64,
    pub mode: u32,
}

impl DirEntryAttr {
    /// The entry's type as the FUSE protocol names it, `None` if the host
    /// did not report one.
    pub fn file_type(&self) -> Option<FileType> {
        match self.mode & libc::S_IFMT {
            libc::S_IFDIR => Some(FileType::Directory),
            libc::S_IFREG => Some(FileType::RegularFile),
            libc::S_IFLNK => Some(FileType::Symlink),
            libc::S_IFBLK => Some(FileType::BlockDevice),
            libc::S_IFCHR => Some(FileType::CharDevice),
            libc::S_IFIFO => Some(FileType::NamedPipe),
            libc::S_IFSOCK => Some(FileType::Socket),
            _ => None,
        }
    }
}

/// Consumer handed to [`PathOperations::readdir`]. Returning `true` stops
/// the enumeration.
pub type DirFiller<'a> = dyn FnMut(&OsStr, &DirEntryAttr) -> bool + 'a;

pub trait PathOperations: Send + Sync + 'static {
    /// Attributes of the entry itself; symlinks are not followed.
    fn getattr(&self, path: &Path) -> FsResult<Metadata>;

    fn access(&self, path: &Path, mask: i32) -> FsResult<()>;

    /// Read a symlink target into `buf`, keeping room for the trailing NUL.
    /// Returns the number of target bytes stored.
    fn readlink(&self, path: &Path, buf: &mut [u8]) -> FsResult<usize>;

    fn readdir(&self, path: &Path, filler: &mut DirFiller<'_>) -> FsResult<()>;

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()>;

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()>;

    fn unlink(&self, path: &Path) -> FsResult<()>;

    fn rmdir(&self, path: &Path) -> FsResult<()>;

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Change ownership without following symlinks; `None` keeps an id.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;

    fn truncate(&self, path: &Path, size: i64) -> FsResult<()>;

    fn utimens(&self, path: &Path, atime: &TimeSpec, mtime: &TimeSpec) -> FsResult<()>;

    /// Check that the path can be opened with `flags`. No handle is kept.
    fn open(&self, path: &Path, flags: i32) -> FsResult<()>;

    fn read(&self, path: &Path, buf: &mut [u8], offset: i64) -> FsResult<usize>;

    fn write(&self, path: &Path, data: &[u8], offset: i64) -> FsResult<usize>;

    fn statfs(&self, path: &Path) -> FsResult<Statvfs>;
}
