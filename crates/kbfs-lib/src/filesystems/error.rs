use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur in filesystem operations
#[derive(Error, Debug)]
pub enum FsError {
    /// A host primitive failed; the errno is carried unchanged.
    #[error("{path:?}: {errno}")]
    Os { errno: Errno, path: PathBuf },

    #[error("Invalid name in client path: {0:?}")]
    InvalidName(PathBuf),

    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("Backing root {path:?} is unusable: {source}")]
    BackingRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    pub fn os(errno: Errno, path: impl AsRef<Path>) -> Self {
        FsError::Os {
            errno,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The POSIX error kind this failure reports to the transport.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::Os { errno, .. } => *errno,
            FsError::InvalidName(_) => Errno::EINVAL,
            FsError::NotSupported(_) => Errno::ENOSYS,
            FsError::BackingRoot { source, .. } => {
                Errno::from_raw(source.raw_os_error().unwrap_or(libc::EIO))
            }
        }
    }
}

/// Extension trait for attaching the real path to a failed host call
pub trait IoErrorExt {
    /// Convert into an `FsError::Os`, keeping the OS error code unchanged
    fn into_fs_error(self, path: impl AsRef<Path>) -> FsError;
}

impl IoErrorExt for io::Error {
    fn into_fs_error(self, path: impl AsRef<Path>) -> FsError {
        FsError::os(Errno::from_raw(self.raw_os_error().unwrap_or(libc::EIO)), path)
    }
}

impl IoErrorExt for Errno {
    fn into_fs_error(self, path: impl AsRef<Path>) -> FsError {
        FsError::os(self, path)
    }
}

/// Extension trait to convert FsError to i32 error codes for FUSE
pub trait FsErrorCode {
    /// Convert to a libc error code for FUSE replies
    fn to_error_code(&self) -> i32;
}

impl FsErrorCode for FsError {
    fn to_error_code(&self) -> i32 {
        self.errno() as i32
    }
}

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Render a handler result in the transport return convention: the host's
/// value on success, the negated errno on failure.
pub fn status(result: FsResult<usize>) -> isize {
    match result {
        Ok(n) => n as isize,
        Err(e) => -(e.to_error_code() as isize),
    }
}
