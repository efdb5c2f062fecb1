//! [`TestTree`] scratch layout for sync scenarios.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary directory holding `dest/`, `state/` and `store/`, with
/// assertion helpers for paths relative to `dest/`.
///
/// # Example
///
/// ```rust,no_run
/// use uncvmfs_test_utils::TestTree;
///
/// let tree = TestTree::new();
/// let config = tree.write_config("sw", "http://127.0.0.1:9", "");
/// tree.assert_missing("a/f");
/// ```
pub struct TestTree {
    temp_dir: TempDir,
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTree {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Destination root; not created until a sync creates it.
    pub fn dest(&self) -> PathBuf {
        self.root().join("dest")
    }

    pub fn state(&self) -> PathBuf {
        self.root().join("state")
    }

    pub fn store(&self) -> PathBuf {
        self.root().join("store")
    }

    /// `rel` below the destination root
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dest().join(rel)
    }

    /// Write `config.toml` with a `[repos.<name>]` section pointing at this
    /// tree, followed by `extra` lines inside the same section.
    pub fn write_config(&self, name: &str, url: &str, extra: &str) -> PathBuf {
        let path = self.root().join("config.toml");
        let content = format!(
            "[repos.{name}]\nurl = \"{url}\"\ndest = \"{}\"\nstate = \"{}\"\nstore = \"{}\"\n{extra}\n",
            self.dest().display(),
            self.state().display(),
            self.store().display(),
        );
        fs::write(&path, content).unwrap();
        path
    }

    /// # Panics
    /// Panics unless `rel` is a regular file holding exactly `content`.
    pub fn assert_file(&self, rel: &str, content: &[u8]) {
        let path = self.path(rel);
        let meta = fs::symlink_metadata(&path)
            .unwrap_or_else(|e| panic!("Expected file {}: {e}", path.display()));
        assert!(meta.is_file(), "Expected regular file: {}", path.display());
        assert_eq!(
            fs::read(&path).unwrap(),
            content,
            "Unexpected content in {}",
            path.display()
        );
    }

    /// # Panics
    /// Panics unless `rel` is a symlink pointing at `target`.
    pub fn assert_symlink(&self, rel: &str, target: &str) {
        let path = self.path(rel);
        let actual = fs::read_link(&path)
            .unwrap_or_else(|e| panic!("Expected symlink {}: {e}", path.display()));
        assert_eq!(actual, Path::new(target), "Wrong target for {}", path.display());
    }

    /// # Panics
    /// Panics unless `rel` is a real directory.
    pub fn assert_dir(&self, rel: &str) {
        let path = self.path(rel);
        let is_dir = fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir());
        assert!(is_dir, "Expected directory: {}", path.display());
    }

    /// # Panics
    /// Panics if anything, even a dangling symlink, exists at `rel`.
    pub fn assert_missing(&self, rel: &str) {
        let path = self.path(rel);
        assert!(
            fs::symlink_metadata(&path).is_err(),
            "Expected nothing at {}",
            path.display()
        );
    }

    /// Every object below `dest/` as `dir`, `link:<target>` or
    /// `file:<content>`, keyed by relative path.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        walk(&self.dest(), &self.dest(), &mut |rel, path, meta| {
            let value = if meta.is_dir() {
                "dir".to_string()
            } else if meta.file_type().is_symlink() {
                format!("link:{}", fs::read_link(path).unwrap().display())
            } else {
                format!("file:{}", String::from_utf8_lossy(&fs::read(path).unwrap()))
            };
            out.insert(rel, value);
        });
        out
    }

    /// Inode, modification and change times of every object below `dest/`.
    ///
    /// Two equal stamps mean nothing was created, replaced or modified in
    /// between.
    pub fn stamps(&self) -> BTreeMap<String, (u64, i64, i64, i64, i64)> {
        let mut out = BTreeMap::new();
        walk(&self.dest(), &self.dest(), &mut |rel, _, meta| {
            out.insert(
                rel,
                (
                    meta.ino(),
                    meta.mtime(),
                    meta.mtime_nsec(),
                    meta.ctime(),
                    meta.ctime_nsec(),
                ),
            );
        });
        out
    }
}

fn walk(base: &Path, dir: &Path, visit: &mut dyn FnMut(String, &Path, &fs::Metadata)) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        let meta = fs::symlink_metadata(&path).unwrap();
        let rel = path
            .strip_prefix(base)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        visit(rel, &path, &meta);
        if meta.is_dir() {
            walk(base, &path, visit);
        }
    }
}
