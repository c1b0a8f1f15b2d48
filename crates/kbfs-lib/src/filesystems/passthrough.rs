//! Passthrough operation handlers.
//!
//! Each handler follows the same steps:
//! 1. Translate the client path(s) to real path(s) under the backing root
//! 2. Call exactly one host primitive with the caller's arguments unchanged
//! 3. Drop the real path(s) and any opened file or directory
//! 4. Surface the host's value, or its errno, unchanged
//!
//! Nothing is cached between calls: `open` only validates, and every
//! `read`/`write` reopens the file.

use std::ffi::OsStr;
use std::fs::{self, File, Metadata, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{lchown, FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use nix::dir::{Dir, Type};
use nix::errno::Errno;
use nix::fcntl::{open, readlink, OFlag};
use nix::sys::stat::{mknod, utimes, Mode, SFlag};
use nix::sys::statvfs::{statvfs, Statvfs};
use nix::sys::time::{TimeSpec, TimeVal, TimeValLike};
use nix::unistd::{access, mkdir, truncate, unlink, AccessFlags};

use super::context::MountContext;
use super::error::{FsError, FsResult, IoErrorExt};
use super::operations::{DirEntryAttr, DirFiller, PathOperations};

/// The path-translating dispatcher
#[derive(Debug, Clone)]
pub struct PassthroughOps {
    ctx: Arc<MountContext>,
}

impl PassthroughOps {
    pub fn new(ctx: Arc<MountContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &MountContext {
        &self.ctx
    }

    fn real(&self, path: &Path) -> PathBuf {
        self.ctx.real_path(path)
    }

    /// Type bits of a mode (`d_type << 12`) for a directory entry type
    fn type_bits(kind: Option<Type>) -> u32 {
        match kind {
            Some(Type::Fifo) => libc::S_IFIFO,
            Some(Type::CharacterDevice) => libc::S_IFCHR,
            Some(Type::Directory) => libc::S_IFDIR,
            Some(Type::BlockDevice) => libc::S_IFBLK,
            Some(Type::File) => libc::S_IFREG,
            Some(Type::Symlink) => libc::S_IFLNK,
            Some(Type::Socket) => libc::S_IFSOCK,
            None => 0,
        }
    }

    /// Microsecond-resolution copy of a timestamp
    fn to_timeval(ts: &TimeSpec) -> TimeVal {
        TimeVal::seconds(ts.tv_sec()) + TimeVal::microseconds(ts.tv_nsec() / 1_000)
    }

    fn offset(offset: i64, real: &Path) -> FsResult<u64> {
        u64::try_from(offset).map_err(|_| FsError::os(Errno::EINVAL, real))
    }

    fn fail<E: IoErrorExt>(op: &str, real: &Path, e: E) -> FsError {
        let err = e.into_fs_error(real);
        debug!("{}: {}", op, err);
        err
    }
}

impl PathOperations for PassthroughOps {
    fn getattr(&self, path: &Path) -> FsResult<Metadata> {
        debug!("getattr(path={:?})", path);
        let real = self.real(path);
        fs::symlink_metadata(&real).map_err(|e| Self::fail("getattr", &real, e))
    }

    fn access(&self, path: &Path, mask: i32) -> FsResult<()> {
        debug!("access(path={:?}, mask=0x{:x})", path, mask);
        let real = self.real(path);
        access(&real, AccessFlags::from_bits_retain(mask))
            .map_err(|e| Self::fail("access", &real, e))
    }

    fn readlink(&self, path: &Path, buf: &mut [u8]) -> FsResult<usize> {
        debug!("readlink(path={:?}, size={})", path, buf.len());
        let real = self.real(path);
        if buf.is_empty() {
            return Err(FsError::os(Errno::EINVAL, &real));
        }

        let target = readlink(&real).map_err(|e| Self::fail("readlink", &real, e))?;
        let target = target.as_bytes();
        let len = target.len().min(buf.len() - 1);
        buf[..len].copy_from_slice(&target[..len]);
        buf[len] = 0;
        Ok(len)
    }

    fn readdir(&self, path: &Path, filler: &mut DirFiller<'_>) -> FsResult<()> {
        debug!("readdir(path={:?})", path);
        let real = self.real(path);

        let mut dir = Dir::open(
            &real,
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| Self::fail("readdir", &real, e))?;

        for entry in dir.iter() {
            let entry = entry.map_err(|e| Self::fail("readdir", &real, e))?;
            let attr = DirEntryAttr {
                ino: entry.ino(),
                mode: Self::type_bits(entry.file_type()),
            };
            let name = OsStr::from_bytes(entry.file_name().to_bytes());
            if filler(name, &attr) {
                debug!("readdir: consumer stopped at {:?}", name);
                break;
            }
        }

        Ok(())
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()> {
        debug!("mknod(path={:?}, mode=0o{:o}, rdev={})", path, mode, rdev);
        let real = self.real(path);
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & !libc::S_IFMT);
        mknod(&real, kind, perm, rdev).map_err(|e| Self::fail("mknod", &real, e))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        debug!("mkdir(path={:?}, mode=0o{:o})", path, mode);
        let real = self.real(path);
        mkdir(&real, Mode::from_bits_truncate(mode)).map_err(|e| Self::fail("mkdir", &real, e))
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        debug!("unlink(path={:?})", path);
        let real = self.real(path);
        unlink(&real).map_err(|e| Self::fail("unlink", &real, e))
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        debug!("rmdir(path={:?})", path);
        let real = self.real(path);
        fs::remove_dir(&real).map_err(|e| Self::fail("rmdir", &real, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        debug!("rename(from={:?}, to={:?})", from, to);
        let real_from = self.real(from);
        let real_to = self.real(to);
        fs::rename(&real_from, &real_to).map_err(|e| Self::fail("rename", &real_from, e))
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        debug!("chmod(path={:?}, mode=0o{:o})", path, mode);
        let real = self.real(path);
        fs::set_permissions(&real, fs::Permissions::from_mode(mode))
            .map_err(|e| Self::fail("chmod", &real, e))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        debug!("chown(path={:?}, uid={:?}, gid={:?})", path, uid, gid);
        let real = self.real(path);
        lchown(&real, uid, gid).map_err(|e| Self::fail("chown", &real, e))
    }

    fn truncate(&self, path: &Path, size: i64) -> FsResult<()> {
        debug!("truncate(path={:?}, size={})", path, size);
        let real = self.real(path);
        truncate(&real, size).map_err(|e| Self::fail("truncate", &real, e))
    }

    fn utimens(&self, path: &Path, atime: &TimeSpec, mtime: &TimeSpec) -> FsResult<()> {
        debug!("utimens(path={:?}, atime={:?}, mtime={:?})", path, atime, mtime);
        let real = self.real(path);
        utimes(&real, &Self::to_timeval(atime), &Self::to_timeval(mtime))
            .map_err(|e| Self::fail("utimens", &real, e))
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<()> {
        debug!("open(path={:?}, flags=0x{:x})", path, flags);
        let real = self.real(path);

        // Dropping the descriptor closes it straight away.
        open(&real, OFlag::from_bits_retain(flags), Mode::empty())
            .map(drop)
            .map_err(|e| Self::fail("open", &real, e))
    }

    fn read(&self, path: &Path, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        debug!("read(path={:?}, offset={}, size={})", path, offset, buf.len());
        let real = self.real(path);

        let file = File::open(&real).map_err(|e| Self::fail("read", &real, e))?;
        let offset = Self::offset(offset, &real)?;
        file.read_at(buf, offset).map_err(|e| Self::fail("read", &real, e))
    }

    fn write(&self, path: &Path, data: &[u8], offset: i64) -> FsResult<usize> {
        debug!("write(path={:?}, offset={}, len={})", path, offset, data.len());
        let real = self.real(path);

        let file = OpenOptions::new()
            .write(true)
            .open(&real)
            .map_err(|e| Self::fail("write", &real, e))?;
        let offset = Self::offset(offset, &real)?;
        // A failing close on drop is not reported.
        file.write_at(data, offset).map_err(|e| Self::fail("write", &real, e))
    }

    fn statfs(&self, path: &Path) -> FsResult<Statvfs> {
        debug!("statfs(path={:?})", path);
        let real = self.real(path);
        statvfs(&real).map_err(|e| Self::fail("statfs", &real, e))
    }
}
