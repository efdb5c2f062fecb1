//! End-to-end tests for the sync engine against an in-memory catalog

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use uncvmfs_core::{
    Catalog, CheckpointStore, ContentStore, DownloadPool, EntryKind, Error, ManifestCatalog,
    MemoryCatalog, MemoryFetcher, PoolOptions, SyncEngine, SyncReport,
};
use uncvmfs_core::catalog::MemoryCatalogBuilder;
use uncvmfs_fs::{CatalogPath, ContentId, Expander};
use uncvmfs_test_utils::TestTree;

fn expander() -> Expander {
    Expander::new(BTreeMap::from([("ARCH".to_string(), "x86_64".to_string())]))
}

fn engine(tree: &TestTree, fetcher: &Arc<MemoryFetcher>) -> SyncEngine {
    let store = ContentStore::open(&tree.store()).unwrap();
    let pool = DownloadPool::new(PoolOptions::new(2), store, Arc::clone(fetcher) as _);
    SyncEngine::new(
        &tree.dest(),
        CheckpointStore::new(&tree.state()),
        expander(),
        pool,
    )
}

/// Build the catalog and a fetcher that can serve every file in it.
fn catalog(builder: MemoryCatalogBuilder) -> (MemoryCatalog, Arc<MemoryFetcher>) {
    let fetcher = Arc::new(MemoryFetcher::new(builder.blobs().clone()));
    (builder.build().unwrap(), fetcher)
}

fn sync(tree: &TestTree, catalog: &dyn Catalog, fetcher: &Arc<MemoryFetcher>) -> SyncReport {
    engine(tree, fetcher).run(catalog).unwrap()
}

fn software() -> MemoryCatalogBuilder {
    MemoryCatalog::builder()
        .file("bin/tool", b"#!/bin/sh\necho tool\n")
        .symlink("bin/current", "tool")
        .file("lib/libx.so", b"\x7fELF libx")
        .file("lib/deep/data.bin", b"data")
        .symlink("lib/arch", "/opt/$(ARCH)/lib")
        .dir("empty")
        .file("README", b"readme")
}

#[test]
fn first_run_mirrors_the_catalog() {
    let tree = TestTree::new();
    let (catalog, fetcher) = catalog(software());

    let report = sync(&tree, &catalog, &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    tree.assert_file("bin/tool", b"#!/bin/sh\necho tool\n");
    tree.assert_symlink("bin/current", "tool");
    tree.assert_file("lib/deep/data.bin", b"data");
    tree.assert_symlink("lib/arch", "/opt/x86_64/lib");
    tree.assert_dir("empty");
    tree.assert_file("README", b"readme");
    assert_eq!(report.files_placed, 4);
    assert_eq!(report.links_created, 2);
    assert_eq!(report.dirs_created, 4);
}

#[test]
fn two_run_scenario_replaces_content_and_removes_link() {
    let tree = TestTree::new();
    let first = MemoryCatalog::builder()
        .dir("a")
        .file("a/f", b"H1 content")
        .symlink("a/l", "/opt/x");
    let second = MemoryCatalog::builder().dir("a").file("a/f", b"H2 content");
    let mut blobs = first.blobs().clone();
    blobs.extend(second.blobs().clone());
    let fetcher = Arc::new(MemoryFetcher::new(blobs));

    sync(&tree, &first.build().unwrap(), &fetcher);
    tree.assert_file("a/f", b"H1 content");
    tree.assert_symlink("a/l", "/opt/x");
    let dir_before = tree.stamps()["a"].0;

    let report = sync(&tree, &second.build().unwrap(), &fetcher);

    tree.assert_file("a/f", b"H2 content");
    tree.assert_missing("a/l");
    assert_eq!(tree.stamps()["a"].0, dir_before);
    assert_eq!(report.dirs_created, 0);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.files_placed, 1);
}

#[test]
fn second_run_without_changes_touches_nothing() {
    let tree = TestTree::new();
    let (catalog, fetcher) = catalog(software());
    sync(&tree, &catalog, &fetcher);
    let stamps = tree.stamps();
    let fetches = fetcher.fetch_count();

    let report = sync(&tree, &catalog, &fetcher);

    assert_eq!(report.mutations(), 0);
    assert_eq!(report.levels_committed, 0);
    assert_eq!(fetcher.fetch_count(), fetches);
    assert_eq!(tree.stamps(), stamps);
}

#[test]
fn interrupted_run_resumes_to_the_same_tree() {
    let reference = TestTree::new();
    let (catalog, fetcher) = catalog(software());
    sync(&reference, &catalog, &fetcher);

    let tree = TestTree::new();
    let mut broken = catalog.clone();
    broken.make_unreadable(CatalogPath::parse("lib/deep").unwrap());
    let err = engine(&tree, &fetcher).run(&broken).unwrap_err();
    assert!(matches!(err, Error::Catalog { .. }));
    // Levels finished before the failure were kept
    tree.assert_file("bin/tool", b"#!/bin/sh\necho tool\n");
    assert!(
        CheckpointStore::new(&tree.state())
            .load(&CatalogPath::parse("bin").unwrap())
            .unwrap()
            .is_some()
    );

    let report = sync(&tree, &catalog, &fetcher);

    assert!(report.success());
    assert_eq!(tree.snapshot(), reference.snapshot());
}

#[test]
fn directory_replaced_by_file_is_deleted_first() {
    let tree = TestTree::new();
    let (before, fetcher) = catalog(
        MemoryCatalog::builder()
            .file("x/inner", b"inner")
            .file("x/sub/more", b"more"),
    );
    sync(&tree, &before, &fetcher);
    tree.assert_dir("x/sub");

    let (after, fetcher) = catalog(MemoryCatalog::builder().file("x", b"now a file"));
    let report = sync(&tree, &after, &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    tree.assert_file("x", b"now a file");
    let checkpoints = CheckpointStore::new(&tree.state());
    assert!(
        checkpoints
            .load(&CatalogPath::parse("x").unwrap())
            .unwrap()
            .is_none()
    );
    assert!(
        checkpoints
            .load(&CatalogPath::parse("x/sub").unwrap())
            .unwrap()
            .is_none()
    );
}

#[test]
fn file_replaced_by_directory() {
    let tree = TestTree::new();
    let (before, fetcher) = catalog(MemoryCatalog::builder().file("x", b"a file"));
    sync(&tree, &before, &fetcher);

    let (after, fetcher) = catalog(MemoryCatalog::builder().file("x/inner", b"inner"));
    let report = sync(&tree, &after, &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    tree.assert_file("x/inner", b"inner");
    assert_eq!(report.deleted, 0);

    // And the result is stable
    let stamps = tree.stamps();
    assert_eq!(sync(&tree, &after, &fetcher).mutations(), 0);
    assert_eq!(tree.stamps(), stamps);
}

#[test]
fn failed_download_is_retried_on_next_run() {
    let tree = TestTree::new();
    let builder = MemoryCatalog::builder()
        .file("pkg/ok", b"fine")
        .file("pkg/flaky", b"unlucky");
    let flaky = ContentId::of(b"unlucky");
    let partial: Vec<_> = builder
        .blobs()
        .iter()
        .filter(|(id, _)| **id != flaky)
        .map(|(id, content)| (*id, content.clone()))
        .collect();
    let (catalog, full) = catalog(builder);

    let report = sync(&tree, &catalog, &Arc::new(MemoryFetcher::new(partial)));

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("/pkg/flaky"));
    tree.assert_file("pkg/ok", b"fine");
    tree.assert_missing("pkg/flaky");

    let report = sync(&tree, &catalog, &full);

    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(report.files_placed, 1);
    tree.assert_file("pkg/flaky", b"unlucky");
    assert_eq!(sync(&tree, &catalog, &full).mutations(), 0);
}

#[test]
fn unchanged_subtree_is_not_read_again() {
    let tree = TestTree::new();
    let (first, fetcher) = catalog(software());
    sync(&tree, &first, &fetcher);

    let (mut second, fetcher) = catalog(software().file("README", b"readme v2"));
    // Any attempt to list an unchanged level would now fail the run
    second.make_unreadable(CatalogPath::parse("lib").unwrap());
    second.make_unreadable(CatalogPath::parse("bin").unwrap());

    let report = sync(&tree, &second, &fetcher);

    tree.assert_file("README", b"readme v2");
    assert_eq!(report.files_placed, 1);
    assert_eq!(report.levels_committed, 1);
}

#[test]
fn stale_leftovers_are_cleared() {
    let tree = TestTree::new();
    let (catalog, fetcher) = catalog(MemoryCatalog::builder().file("f", b"x").symlink("l", "f"));
    std::fs::create_dir_all(tree.path("f/junk")).unwrap();
    std::fs::write(tree.path("l"), b"not a link").unwrap();

    let report = sync(&tree, &catalog, &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    tree.assert_file("f", b"x");
    tree.assert_symlink("l", "f");
}

/// Snapshot with `/a/f`, sending `dir_identity` for `/a` whatever its listing.
fn snapshot(dir_identity: &str, file: &[u8]) -> ManifestCatalog {
    let json = serde_json::json!({
        "dirs": {
            "/": [ { "name": "a", "kind": "directory", "identity": dir_identity } ],
            "/a": [ { "name": "f", "kind": "file", "identity": ContentId::of(file).to_hex() } ]
        }
    });
    ManifestCatalog::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap()
}

#[test]
fn snapshot_change_below_constant_directory_identity_is_synced() {
    let tree = TestTree::new();
    let fetcher = Arc::new(MemoryFetcher::new([
        (ContentId::of(b"H1"), b"H1".to_vec()),
        (ContentId::of(b"H2"), b"H2".to_vec()),
    ]));
    let constant = "0".repeat(64);
    sync(&tree, &snapshot(&constant, b"H1"), &fetcher);
    tree.assert_file("a/f", b"H1");

    let report = sync(&tree, &snapshot(&constant, b"H2"), &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(report.files_placed, 1);
    tree.assert_file("a/f", b"H2");
}

#[test]
fn directory_that_cannot_be_created_is_pruned_and_retried() {
    let tree = TestTree::new();
    let long = "n".repeat(300);
    let (broken, fetcher) = catalog(
        MemoryCatalog::builder()
            .file(&format!("{long}/inner"), b"never fetched")
            .file("keep", b"keep"),
    );

    let report = sync(&tree, &broken, &fetcher);

    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert!(report.errors[0].starts_with(&format!("mkdir /{long}")));
    // Nothing below the failed directory was attempted
    assert_eq!(fetcher.fetch_count(), 1);
    tree.assert_file("keep", b"keep");
    let root = CheckpointStore::new(&tree.state())
        .entries(&CatalogPath::root())
        .unwrap();
    assert!(root.contains_key("keep"));
    assert!(!root.contains_key(&long));

    let report = sync(&tree, &broken, &fetcher);

    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert_eq!(report.mutations(), 0);

    let (fixed, fetcher) = catalog(MemoryCatalog::builder().file("keep", b"keep"));
    let report = sync(&tree, &fixed, &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(report.mutations(), 0);
}

#[test]
fn failed_delete_skips_the_create_and_is_retried() {
    let tree = TestTree::new();
    let (before, fetcher) = catalog(MemoryCatalog::builder().file("d/x", b"x").file("keep", b"keep"));
    sync(&tree, &before, &fetcher);

    // A file where the checkpoints of /d live makes forgetting them fail
    let checkpoints = CheckpointStore::new(&tree.state());
    let d_file = checkpoints.file_for(&CatalogPath::parse("d").unwrap());
    let d_levels = d_file.parent().unwrap().to_path_buf();
    fs::remove_dir_all(&d_levels).unwrap();
    fs::write(&d_levels, b"in the way").unwrap();

    let (after, fetcher) = catalog(
        MemoryCatalog::builder()
            .file("d", b"now a file")
            .file("keep", b"keep"),
    );
    let report = sync(&tree, &after, &fetcher);

    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert!(report.errors[0].starts_with("delete /d"));
    assert_eq!(report.deleted, 0);
    assert_eq!(report.files_placed, 0);
    assert_eq!(fetcher.fetch_count(), 0);
    tree.assert_missing("d");
    let root = checkpoints.entries(&CatalogPath::root()).unwrap();
    assert_eq!(root["d"].kind, EntryKind::Directory);

    fs::remove_file(&d_levels).unwrap();
    let report = sync(&tree, &after, &fetcher);

    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.files_placed, 1);
    tree.assert_file("d", b"now a file");
    assert_eq!(sync(&tree, &after, &fetcher).mutations(), 0);
}
