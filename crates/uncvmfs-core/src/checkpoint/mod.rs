//! Per-directory sync checkpoints
//!
//! A checkpoint is the identity snapshot of one directory level as it was
//! last fully applied to disk. The walker compares the catalog against it to
//! classify entries, and the sync engine rewrites it once the level and all
//! of its descendants are in place.
//!
//! Checkpoints are persisted as TOML, one file per level, in a directory tree
//! that mirrors the catalog:
//!
//! ```text
//! <state>/levels/checkpoint.toml            # root
//! <state>/levels/d_usr/checkpoint.toml      # /usr
//! <state>/levels/d_usr/d_lib/checkpoint.toml
//! ```
//!
//! Each component is prefixed so no catalog name can collide with the
//! checkpoint file itself.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uncvmfs_fs::{CatalogPath, io};

use crate::Result;
use crate::catalog::CatalogEntry;

const FORMAT_VERSION: &str = "1";
const CHECKPOINT_FILE: &str = "checkpoint.toml";
const COMPONENT_PREFIX: &str = "d_";

/// Committed state of one directory level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version for forward compatibility
    version: String,
    path: CatalogPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    committed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: Vec<CatalogEntry>,
}

impl Checkpoint {
    pub fn new(path: CatalogPath, entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            path,
            committed_at: None,
            entries: entries.into_iter().collect(),
        }
    }

    pub fn path(&self) -> &CatalogPath {
        &self.path
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    /// Entries keyed by name
    pub fn by_name(&self) -> BTreeMap<String, CatalogEntry> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect()
    }
}

/// Location of all checkpoints for one repository
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Checkpoints live in `<state_dir>/levels`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            root: state_dir.join("levels"),
        }
    }

    fn level_dir(&self, path: &CatalogPath) -> PathBuf {
        let mut dir = self.root.clone();
        for component in path.components() {
            dir.push(format!("{}{}", COMPONENT_PREFIX, component));
        }
        dir
    }

    pub fn file_for(&self, path: &CatalogPath) -> PathBuf {
        self.level_dir(path).join(CHECKPOINT_FILE)
    }

    /// Load the committed checkpoint of `path`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be locked, read or parsed.
    pub fn load(&self, path: &CatalogPath) -> Result<Option<Checkpoint>> {
        let file_path = self.file_for(path);
        let file = match File::open(&file_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(uncvmfs_fs::Error::io(&file_path, e).into()),
        };
        FileExt::lock_shared(&file)?;

        // Read through the locked handle
        let mut content = String::new();
        (&file).read_to_string(&mut content)?;
        Ok(Some(toml::from_str(&content)?))
    }

    /// Committed entries of `path` keyed by name; empty if never committed.
    pub fn entries(&self, path: &CatalogPath) -> Result<BTreeMap<String, CatalogEntry>> {
        Ok(self
            .load(path)?
            .map(|checkpoint| checkpoint.by_name())
            .unwrap_or_default())
    }

    /// Persist `checkpoint` atomically, stamping the commit time.
    pub fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut stamped = checkpoint.clone();
        stamped.committed_at = Some(Utc::now());
        let content = toml::to_string_pretty(&stamped)?;
        io::write_atomic(&self.file_for(&checkpoint.path), content.as_bytes())?;
        Ok(())
    }

    /// Drop the checkpoints of `path` and everything below it.
    pub fn forget_subtree(&self, path: &CatalogPath) -> Result<()> {
        let dir = self.level_dir(path);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(uncvmfs_fs::Error::io(&dir, e).into()),
        }
    }
}
