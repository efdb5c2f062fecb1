//! Concurrent placement tests
//!
//! Pool workers place files into the destination tree while sharing one
//! content store. These tests check that simultaneous placements of the same
//! source into distinct targets never interfere.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;
use uncvmfs_fs::apply;

#[test]
fn test_concurrent_placements_from_one_source() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("blob");
    fs::write(&source, "shared content").unwrap();

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let source = source.clone();
            let target = dir.path().join(format!("file_{}", thread_id));
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();
                apply::place_file(&source, &target)
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic").unwrap();
    }

    for thread_id in 0..num_threads {
        let content = fs::read_to_string(dir.path().join(format!("file_{}", thread_id))).unwrap();
        assert_eq!(content, "shared content");
    }
}

#[test]
fn test_concurrent_atomic_writes_to_different_files_all_succeed() {
    let dir = tempdir().unwrap();
    let num_threads = 5;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let path = dir.path().join(format!("state_{}.toml", thread_id));
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();
                uncvmfs_fs::io::write_atomic(&path, format!("id = {}", thread_id).as_bytes())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic").unwrap();
    }

    for thread_id in 0..num_threads {
        let content = fs::read_to_string(dir.path().join(format!("state_{}.toml", thread_id))).unwrap();
        assert_eq!(content, format!("id = {}", thread_id));
    }
}

#[test]
fn test_concurrent_atomic_writes_to_one_file_last_rename_wins() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.toml");
    let num_threads = 6;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();
                uncvmfs_fs::io::write_atomic(&path, format!("id = {}", thread_id).as_bytes())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic").unwrap();
    }

    // Writers do not wait for each other: one whole payload survives
    let content = fs::read_to_string(&path).unwrap();
    assert!((0..num_threads).any(|id| content == format!("id = {}", id)));
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name != "state.toml")
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
