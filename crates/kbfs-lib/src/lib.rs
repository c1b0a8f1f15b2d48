pub mod cli;
pub mod filesystems;

pub use filesystems::{FsError, FsResult, FuseBridge, MountContext, PassthroughOps, PathOperations};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
