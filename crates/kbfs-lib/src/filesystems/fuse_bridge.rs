//! Bridge between `fuser` and the path-addressed handlers.
//!
//! The kernel talks in inode numbers; the handlers talk in client paths.
//! `FuseBridge` keeps an inode → client path table (populated by `lookup`,
//! `mknod` and `mkdir`, trimmed by `forget`), resolves every request to a
//! client path and forwards it to a [`PathOperations`] implementation. Host
//! errors are replied unchanged.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::{EINVAL, ENOENT};
use log::{debug, info, warn};
use nix::sys::time::TimeSpec;

use super::error::{FsError, FsErrorCode, FsResult};
use super::operations::{DirEntryAttr, PathOperations};
use super::path_translator::{child_path, CLIENT_ROOT};

/// TTL for cached attributes (1 second)
const TTL: Duration = Duration::from_secs(1);

/// FUSE root inode number
pub const FUSE_ROOT_ID: u64 = 1;

/// Name reported to the kernel for mounted instances
pub const FS_NAME: &str = "kbfs";

struct InodeEntry {
    path: PathBuf,
    lookups: u64,
}

/// Inode number → client path, for the paths the kernel currently holds a
/// lookup reference on. Entries go away once the kernel forgets them.
struct InodeTable {
    entries: RwLock<HashMap<u64, InodeEntry>>,
}

impl InodeTable {
    fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            FUSE_ROOT_ID,
            InodeEntry {
                path: PathBuf::from(CLIENT_ROOT),
                lookups: 0,
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn get(&self, ino: u64) -> Option<PathBuf> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ino)
            .map(|e| e.path.clone())
    }

    /// Record one kernel lookup reference on `ino` at `path`.
    fn register(&self, ino: u64, path: PathBuf) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.entry(ino) {
            Entry::Occupied(mut o) => {
                let entry = o.get_mut();
                entry.path = path;
                entry.lookups += 1;
            }
            Entry::Vacant(v) => {
                v.insert(InodeEntry { path, lookups: 1 });
            }
        }
    }

    /// Drop `nlookup` references; the entry is removed when none are left.
    fn forget(&self, ino: u64, nlookup: u64) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Entry::Occupied(mut o) = entries.entry(ino) {
            let entry = o.get_mut();
            entry.lookups = entry.lookups.saturating_sub(nlookup);
            if entry.lookups == 0 {
                o.remove();
            }
        }
    }

    /// Drop the mapping for a removed `path`.
    fn remove_path(&self, path: &Path) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|&ino, e| ino == FUSE_ROOT_ID || e.path != path);
    }

    /// Rewrite `from` and everything below it to live under `to`.
    fn rename(&self, from: &Path, to: &Path) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|&ino, e| ino == FUSE_ROOT_ID || e.path != to);
        for (&ino, entry) in entries.iter_mut() {
            if ino == FUSE_ROOT_ID {
                continue;
            }
            if let Ok(rest) = entry.path.strip_prefix(from) {
                entry.path = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Kernel inode number for a host inode number. The backing root's own
/// number and `FUSE_ROOT_ID` trade places, so a host file numbered 1 can
/// never pass for the root.
fn fuse_ino(host_ino: u64, root_host_ino: u64) -> u64 {
    if host_ino == root_host_ino {
        FUSE_ROOT_ID
    } else if host_ino == FUSE_ROOT_ID {
        root_host_ino
    } else {
        host_ino
    }
}

/// `fuser::Filesystem` on top of any [`PathOperations`]
pub struct FuseBridge<O: PathOperations> {
    ops: O,
    inodes: InodeTable,
    root_host_ino: u64,
}

impl<O: PathOperations> FuseBridge<O> {
    pub fn new(ops: O) -> Self {
        Self {
            ops,
            inodes: InodeTable::new(),
            root_host_ino: FUSE_ROOT_ID,
        }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Mount options for a kbfs instance
    pub fn mount_options(allow_other: bool) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(FS_NAME.to_string()),
            MountOption::Subtype(FS_NAME.to_string()),
        ];
        if allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }

    /// Mount the filesystem; blocks until it is unmounted
    pub fn mount(self, mount_point: &Path, options: &[MountOption]) -> io::Result<()> {
        info!("Mounting {} at {:?}", FS_NAME, mount_point);
        fuser::mount2(self, mount_point, options)
    }

    /// Mount the filesystem on a background thread
    pub fn spawn(
        self,
        mount_point: &Path,
        options: &[MountOption],
    ) -> io::Result<BackgroundSession> {
        info!("Mounting {} at {:?} in the background", FS_NAME, mount_point);
        fuser::spawn_mount2(self, mount_point, options)
    }

    // =========================================================================
    // Path Helpers
    // =========================================================================

    fn path_of(&self, ino: u64) -> FsResult<PathBuf> {
        self.inodes.get(ino).ok_or_else(|| {
            debug!("inode {} is not known", ino);
            FsError::os(nix::errno::Errno::ENOENT, format!("<inode {}>", ino))
        })
    }

    fn entry_path(&self, parent: u64, name: &OsStr) -> FsResult<PathBuf> {
        let parent_path = self.path_of(parent)?;
        child_path(&parent_path, name)
    }

    /// Stat `path`, remember its inode and build the reply attributes
    fn stat_and_register(&self, path: PathBuf) -> FsResult<FileAttr> {
        let meta = self.ops.getattr(&path)?;
        let ino = fuse_ino(meta.ino(), self.root_host_ino);
        let attr = metadata_to_attr(&meta, ino);
        self.inodes.register(ino, path);
        Ok(attr)
    }

    fn reply_entry(&self, path: FsResult<PathBuf>, reply: ReplyEntry) {
        match path.and_then(|p| self.stat_and_register(p)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn reply_attr(&self, ino: u64, reply: ReplyAttr) {
        let result = self.path_of(ino).and_then(|p| self.ops.getattr(&p));
        match result {
            Ok(meta) => {
                let returned_ino = fuse_ino(meta.ino(), self.root_host_ino);
                reply.attr(&TTL, &metadata_to_attr(&meta, returned_ino));
            }
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn reply_empty(result: FsResult<()>, reply: ReplyEmpty) {
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    /// Apply the attribute changes of a `setattr` in order, stopping at the
    /// first failure.
    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        path: &Path,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> FsResult<()> {
        if let Some(size) = size {
            self.ops.truncate(path, size as i64)?;
        }
        if let Some(mode) = mode {
            self.ops.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.ops.chown(path, uid, gid)?;
        }
        if atime.is_some() || mtime.is_some() {
            let current = self.ops.getattr(path)?;
            let atime = match atime {
                Some(t) => time_or_now_to_timespec(t),
                None => TimeSpec::new(current.atime(), current.atime_nsec()),
            };
            let mtime = match mtime {
                Some(t) => time_or_now_to_timespec(t),
                None => TimeSpec::new(current.mtime(), current.mtime_nsec()),
            };
            self.ops.utimens(path, &atime, &mtime)?;
        }
        Ok(())
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nsecs as u64)
    }
}

fn time_or_now_to_timespec(t: TimeOrNow) -> TimeSpec {
    let t = match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    };
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => TimeSpec::from(d),
        Err(e) => TimeSpec::new(0, 0) - TimeSpec::from(e.duration()),
    }
}

fn metadata_to_filetype(meta: &Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

/// Convert lstat metadata to fuser::FileAttr
fn metadata_to_attr(meta: &Metadata, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH, // Not available on Linux
        kind: metadata_to_filetype(meta),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

impl<O: PathOperations> Filesystem for FuseBridge<O> {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        let root = self
            .ops
            .getattr(Path::new(CLIENT_ROOT))
            .map_err(|e| e.to_error_code())?;
        self.root_host_ino = root.ino();
        info!("{} initialized (root inode {})", FS_NAME, self.root_host_ino);
        Ok(())
    }

    fn destroy(&mut self) {
        info!("{} destroyed", FS_NAME);
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);
        let path = self.entry_path(parent, name);
        self.reply_entry(path, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget(ino={}, nlookup={})", ino, nlookup);
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);
        self.reply_attr(ino, reply);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?})",
            ino, mode, uid, gid, size
        );

        let result = self
            .path_of(ino)
            .and_then(|p| self.apply_setattr(&p, mode, uid, gid, size, atime, mtime));
        match result {
            Ok(()) => self.reply_attr(ino, reply),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);
        let mut buf = vec![0u8; libc::PATH_MAX as usize + 1];
        match self
            .path_of(ino)
            .and_then(|p| self.ops.readlink(&p, &mut buf))
        {
            Ok(len) => reply.data(&buf[..len]),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!(
            "mknod(parent={}, name={:?}, mode=0o{:o}, rdev={})",
            parent, name, mode, rdev
        );
        let path = self
            .entry_path(parent, name)
            .and_then(|p| self.ops.mknod(&p, mode, u64::from(rdev)).map(|()| p));
        self.reply_entry(path, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode=0o{:o})", parent, name, mode);
        let path = self
            .entry_path(parent, name)
            .and_then(|p| self.ops.mkdir(&p, mode).map(|()| p));
        self.reply_entry(path, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);
        let result = self.entry_path(parent, name).and_then(|p| {
            self.ops.unlink(&p)?;
            self.inodes.remove_path(&p);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);
        let result = self.entry_path(parent, name).and_then(|p| {
            self.ops.rmdir(&p)?;
            self.inodes.remove_path(&p);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!(
            "symlink(parent={}, name={:?}, target={:?}) rejected",
            parent, link_name, target
        );
        reply.error(FsError::NotSupported("symlink").to_error_code());
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?}, flags=0x{:x})",
            parent, name, newparent, newname, flags
        );

        // rename(2) has no flags; RENAME_NOREPLACE and friends are refused.
        if flags != 0 {
            reply.error(EINVAL);
            return;
        }

        let result = self.entry_path(parent, name).and_then(|from| {
            let to = self.entry_path(newparent, newname)?;
            self.ops.rename(&from, &to)?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!(
            "link(ino={}, newparent={}, newname={:?}) rejected",
            ino, newparent, newname
        );
        reply.error(FsError::NotSupported("link").to_error_code());
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags=0x{:x})", ino, flags);
        match self.path_of(ino).and_then(|p| self.ops.open(&p, flags)) {
            // No handle is kept; read and write reopen by path.
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, offset={}, size={})", ino, offset, size);
        let mut buf = vec![0u8; size as usize];
        match self
            .path_of(ino)
            .and_then(|p| self.ops.read(&p, &mut buf, offset))
        {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, offset={}, len={})", ino, offset, data.len());
        match self
            .path_of(ino)
            .and_then(|p| self.ops.write(&p, data, offset))
        {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino);
        if self.inodes.get(ino).is_some() {
            reply.opened(0, 0);
        } else {
            reply.error(ENOENT);
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let dir_path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_error_code());
                return;
            }
        };

        let skip = offset.max(0) as u64;
        let mut index: u64 = 0;
        let root_host_ino = self.root_host_ino;
        let result = self.ops.readdir(&dir_path, &mut |name: &OsStr, attr: &DirEntryAttr| {
            index += 1;
            if index <= skip {
                return false;
            }
            let kind = attr.file_type().unwrap_or_else(|| {
                warn!("readdir: no type reported for {:?}", name);
                FileType::RegularFile
            });
            // add() returns true once the reply buffer is full
            reply.add(fuse_ino(attr.ino, root_host_ino), index as i64, kind, name)
        });

        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        debug!("statfs(ino={})", ino);
        let path = self.inodes.get(ino).unwrap_or_else(|| PathBuf::from(CLIENT_ROOT));
        match self.ops.statfs(&path) {
            Ok(stat) => reply.statfs(
                stat.blocks(),
                stat.blocks_free(),
                stat.blocks_available(),
                stat.files(),
                stat.files_free(),
                stat.block_size() as u32,
                stat.name_max() as u32,
                stat.fragment_size() as u32,
            ),
            Err(e) => reply.error(e.to_error_code()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={}, mask=0x{:x})", ino, mask);
        let result = self.path_of(ino).and_then(|p| self.ops.access(&p, mask));
        Self::reply_empty(result, reply);
    }
}
