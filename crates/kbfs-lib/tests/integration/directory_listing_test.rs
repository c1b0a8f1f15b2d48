//! Integration tests for directory enumeration.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::MetadataExt;

use kbfs_lib::filesystems::DirEntryAttr;
use kbfs_lib::PathOperations;
use nix::errno::Errno;

use crate::common::{client, PassthroughHarness};

fn list(h: &PassthroughHarness, path: &str) -> BTreeMap<String, DirEntryAttr> {
    let mut entries = BTreeMap::new();
    h.ops
        .readdir(client(path), &mut |name: &OsStr, attr: &DirEntryAttr| {
            entries.insert(name.to_string_lossy().into_owned(), *attr);
            false
        })
        .unwrap();
    entries
}

#[test]
fn test_lists_file_and_subdirectory_with_types() {
    let h = PassthroughHarness::new();
    h.seed_file("/a", b"file");
    h.seed_dir("/b");

    let mut entries = list(&h, "/");
    entries.remove(".");
    entries.remove("..");

    assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["a", "b"]);

    let a = entries["a"];
    assert_eq!(a.mode, libc::S_IFREG);
    assert_eq!(a.ino, fs::metadata(h.real("/a")).unwrap().ino());

    let b = entries["b"];
    assert_eq!(b.mode, libc::S_IFDIR);
    assert_eq!(b.ino, fs::metadata(h.real("/b")).unwrap().ino());
}

#[test]
fn test_entry_mode_has_no_permission_bits() {
    let h = PassthroughHarness::new();
    h.seed_file("/script.sh", b"#!/bin/sh\n");
    std::os::unix::fs::symlink("script.sh", h.real("/link")).unwrap();

    for (name, attr) in list(&h, "/") {
        assert_eq!(attr.mode & 0o7777, 0, "permission bits set for {}", name);
    }
    assert_eq!(list(&h, "/")["link"].mode, libc::S_IFLNK);
}

#[test]
fn test_consumer_stop_ends_enumeration() {
    let h = PassthroughHarness::new();
    h.seed_file("/a", b"");
    h.seed_dir("/b");

    let mut calls = 0;
    h.ops
        .readdir(client("/"), &mut |_: &OsStr, _: &DirEntryAttr| {
            calls += 1;
            true
        })
        .unwrap();
    assert_eq!(calls, 1);
}

#[test]
fn test_lists_nested_directory() {
    let h = PassthroughHarness::new();
    h.seed_file("/lifecycle_dir/file1.txt", b"File 1");
    h.seed_file("/lifecycle_dir/file2.txt", b"File 2");

    let entries = list(&h, "/lifecycle_dir");
    assert!(entries.contains_key("file1.txt"));
    assert!(entries.contains_key("file2.txt"));
    assert_eq!(
        entries
            .keys()
            .filter(|k| k.as_str() != "." && k.as_str() != "..")
            .count(),
        2
    );
}

#[test]
fn test_readdir_errors() {
    let h = PassthroughHarness::new();
    h.seed_file("/plain", b"");

    let mut never = |_: &OsStr, _: &DirEntryAttr| -> bool { panic!("no entries expected") };

    let err = h.ops.readdir(client("/missing"), &mut never).unwrap_err();
    assert_eq!(err.errno(), Errno::ENOENT);

    let err = h.ops.readdir(client("/plain"), &mut never).unwrap_err();
    assert_eq!(err.errno(), Errno::ENOTDIR);
}

#[test]
fn test_directory_stream_is_closed() {
    fn open_fds() -> usize {
        fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
    }

    let h = PassthroughHarness::new();
    h.seed_file("/a", b"");

    let before = open_fds();
    for _ in 0..500 {
        h.ops
            .readdir(client("/"), &mut |_: &OsStr, _: &DirEntryAttr| true)
            .unwrap();
        h.ops
            .readdir(client("/"), &mut |_: &OsStr, _: &DirEntryAttr| false)
            .unwrap();
    }
    let after = open_fds();

    // Other tests run concurrently, so allow some slack
    assert!(after < before + 100, "fds grew from {} to {}", before, after);
}
