//! Mount context shared by every handler.
//!
//! Built once before the filesystem is attached and read-only afterwards.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use log::info;

use super::error::{FsError, FsResult};
use super::path_translator::translate;

/// Fixed location of the backing directory used by the `kbfs` binary
pub const DEFAULT_BACKING_ROOT: &str = "/tmp/fusefs";

/// Permission bits of a freshly created backing directory (rwxr-xr-x)
pub const BACKING_ROOT_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountContext {
    backing_root: PathBuf,
    mount_point: PathBuf,
}

impl MountContext {
    /// Create a context over an existing backing directory.
    ///
    /// # Errors
    /// Returns an error if `backing_root` doesn't exist or isn't a directory
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(backing_root: P, mount_point: Q) -> FsResult<Self> {
        let backing_root = backing_root.as_ref().to_path_buf();
        let mount_point = mount_point.as_ref().to_path_buf();

        let meta = fs::metadata(&backing_root).map_err(|source| FsError::BackingRoot {
            path: backing_root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(FsError::BackingRoot {
                path: backing_root,
                source: io::Error::from_raw_os_error(libc::ENOTDIR),
            });
        }

        Ok(Self {
            backing_root,
            mount_point,
        })
    }

    /// Startup initialization: ensure [`DEFAULT_BACKING_ROOT`] exists and
    /// resolve the mount point to an absolute path.
    pub fn init<Q: AsRef<Path>>(mount_point: Q) -> FsResult<Self> {
        Self::init_at(DEFAULT_BACKING_ROOT, mount_point)
    }

    pub(crate) fn init_at<P: AsRef<Path>, Q: AsRef<Path>>(
        backing_root: P,
        mount_point: Q,
    ) -> FsResult<Self> {
        let backing_root = backing_root.as_ref();

        if fs::symlink_metadata(backing_root).is_err() {
            info!(
                "Creating backing directory {:?} (mode 0o{:o})",
                backing_root, BACKING_ROOT_MODE
            );
            DirBuilder::new()
                .mode(BACKING_ROOT_MODE)
                .create(backing_root)
                .map_err(|source| FsError::BackingRoot {
                    path: backing_root.to_path_buf(),
                    source,
                })?;
        }

        let mount_point = mount_point.as_ref();
        let mount_point = fs::canonicalize(mount_point).map_err(|source| FsError::BackingRoot {
            path: mount_point.to_path_buf(),
            source,
        })?;

        let ctx = Self::new(backing_root, mount_point)?;
        info!(
            "Mount context ready: backing_root={:?}, mount_point={:?}",
            ctx.backing_root, ctx.mount_point
        );
        Ok(ctx)
    }

    /// Get the backing root
    pub fn backing_root(&self) -> &Path {
        &self.backing_root
    }

    /// Get the mount point
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Real path of a client path under this context's backing root
    pub fn real_path(&self, client_path: &Path) -> PathBuf {
        translate(&self.backing_root, client_path)
    }
}
