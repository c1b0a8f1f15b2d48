//! Integration tests for open, read, write and truncate.

use std::fs;
use std::sync::Arc;
use std::thread;

use kbfs_lib::filesystems::status;
use kbfs_lib::PathOperations;
use nix::errno::Errno;

use crate::common::{client, PassthroughHarness};

#[test]
fn test_write_then_read_round_trip() {
    let h = PassthroughHarness::new();
    h.seed_file("/data.bin", b"");

    let payload = b"0123456789abcdef";
    let written = h.ops.write(client("/data.bin"), payload, 100).unwrap();
    assert_eq!(written, payload.len());

    let mut buf = vec![0u8; payload.len()];
    let read = h.ops.read(client("/data.bin"), &mut buf, 100).unwrap();
    assert_eq!(read, payload.len());
    assert_eq!(&buf, payload);

    // The gap before the offset reads back as zeroes
    let mut head = [0xffu8; 100];
    assert_eq!(h.ops.read(client("/data.bin"), &mut head, 0).unwrap(), 100);
    assert!(head.iter().all(|&b| b == 0));
}

#[test]
fn test_open_then_zero_byte_read_of_empty_file() {
    let h = PassthroughHarness::new();
    h.seed_file("/empty", b"");

    h.ops.open(client("/empty"), libc::O_RDONLY).unwrap();
    let mut buf: [u8; 0] = [];
    let n = h.ops.read(client("/empty"), &mut buf, 0).unwrap();
    assert_eq!(n, 0);
    assert_eq!(status(Ok(n)), 0);
}

#[test]
fn test_read_past_end_returns_zero() {
    let h = PassthroughHarness::new();
    h.seed_file("/short", b"abc");

    let mut buf = [0u8; 8];
    assert_eq!(h.ops.read(client("/short"), &mut buf, 2).unwrap(), 1);
    assert_eq!(buf[0], b'c');
    assert_eq!(h.ops.read(client("/short"), &mut buf, 10).unwrap(), 0);
}

#[test]
fn test_open_validates_without_keeping_a_handle() {
    let h = PassthroughHarness::new();
    h.seed_file("/file", b"contents");

    h.ops.open(client("/file"), libc::O_RDWR).unwrap();
    // The file can be removed straight after open; nothing holds it
    h.ops.unlink(client("/file")).unwrap();

    let err = h.ops.open(client("/file"), libc::O_RDONLY).unwrap_err();
    assert_eq!(err.errno(), Errno::ENOENT);
}

#[test]
fn test_open_passes_flags_through() {
    let h = PassthroughHarness::new();
    h.seed_file("/trunc", b"contents");
    h.seed_dir("/dir");

    h.ops
        .open(client("/trunc"), libc::O_WRONLY | libc::O_TRUNC)
        .unwrap();
    assert_eq!(fs::metadata(h.real("/trunc")).unwrap().len(), 0);

    let err = h.ops.open(client("/dir"), libc::O_WRONLY).unwrap_err();
    assert_eq!(err.errno(), Errno::EISDIR);

    let err = h
        .ops
        .open(client("/trunc"), libc::O_RDONLY | libc::O_DIRECTORY)
        .unwrap_err();
    assert_eq!(err.errno(), Errno::ENOTDIR);
}

#[test]
fn test_open_keeps_accmode_three() {
    let h = PassthroughHarness::new();
    h.seed_dir("/dir");

    // O_ACCMODE asks for read and write, which a directory refuses
    let err = h.ops.open(client("/dir"), libc::O_ACCMODE).unwrap_err();
    assert_eq!(err.errno(), Errno::EISDIR);
}

#[test]
fn test_write_does_not_create_missing_file() {
    let h = PassthroughHarness::new();

    let err = h.ops.write(client("/ghost"), b"boo", 0).unwrap_err();
    assert_eq!(err.errno(), Errno::ENOENT);
    assert!(!h.real("/ghost").exists());
    assert_eq!(status(Err(err)), -(libc::ENOENT as isize));
}

#[test]
fn test_write_to_directory_is_eisdir() {
    let h = PassthroughHarness::new();
    h.seed_dir("/dir");

    let err = h.ops.write(client("/dir"), b"x", 0).unwrap_err();
    assert_eq!(err.errno(), Errno::EISDIR);
}

#[test]
fn test_truncate_shrinks_and_extends() {
    let h = PassthroughHarness::new();
    h.seed_file("/sized", b"Hello, world!");

    h.ops.truncate(client("/sized"), 5).unwrap();
    assert_eq!(fs::read(h.real("/sized")).unwrap(), b"Hello");

    h.ops.truncate(client("/sized"), 8).unwrap();
    assert_eq!(fs::read(h.real("/sized")).unwrap(), b"Hello\0\0\0");

    let err = h.ops.truncate(client("/sized"), -1).unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);
}

#[test]
fn test_concurrent_writes_to_disjoint_ranges() {
    let h = Arc::new(PassthroughHarness::new());
    h.seed_file("/shared", &[0u8; 50]);

    let handles: Vec<_> = (0..5u8)
        .map(|i| {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                let chunk = [b'a' + i; 10];
                let n = h
                    .ops
                    .write(client("/shared"), &chunk, i64::from(i) * 10)
                    .unwrap();
                assert_eq!(n, 10);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let contents = fs::read(h.real("/shared")).unwrap();
    for i in 0..5u8 {
        let start = usize::from(i) * 10;
        assert!(contents[start..start + 10].iter().all(|&b| b == b'a' + i));
    }
}
