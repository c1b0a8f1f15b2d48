//! Integration tests for kbfs
//!
//! These tests drive the handlers against a real backing directory:
//! - Attribute, link and permission operations
//! - Data operations (open, read, write, truncate)
//! - Directory listing
//! - A mounted filesystem through FUSE (ignored unless `/dev/fuse` is usable)

pub mod directory_listing_test;
pub mod read_write_test;
