pub mod context;
pub mod error;
pub mod fuse_bridge;
pub mod operations;
pub mod passthrough;
pub mod path_translator;

// Re-export key types for convenience
pub use context::MountContext;
pub use error::{status, FsError, FsResult};
pub use fuse_bridge::FuseBridge;
pub use operations::{DirEntryAttr, PathOperations};
pub use passthrough::PassthroughOps;
