//! Catalog interface
//!
//! A catalog is the authoritative description of the remote tree. The sync
//! engine only needs one capability from it: list a directory's children,
//! each with its kind and content identity, in catalog order.

mod manifest;
mod memory;

pub use manifest::{ManifestCatalog, Snapshot};
pub use memory::{MemoryCatalog, MemoryCatalogBuilder};

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uncvmfs_fs::{CatalogPath, ContentId};

use crate::{Error, Result};

/// Kind of object a catalog entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    Symlink,
    File,
}

/// One child of a catalog directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: EntryKind,
    pub identity: ContentId,
    /// Symlink target template, possibly containing `$(VAR)` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl CatalogEntry {
    pub fn directory(name: impl Into<String>, identity: ContentId) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            identity,
            target: None,
        }
    }

    pub fn file(name: impl Into<String>, identity: ContentId) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            identity,
            target: None,
        }
    }

    /// A symlink's identity is derived from its unexpanded target.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            name: name.into(),
            kind: EntryKind::Symlink,
            identity: ContentId::of(target.as_bytes()),
            target: Some(target),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Whether both entries describe the same object: same kind, identity and
    /// symlink target.
    pub fn same_object(&self, other: &CatalogEntry) -> bool {
        self.kind == other.kind && self.identity == other.identity && self.target == other.target
    }
}

/// Read access to a catalog tree
pub trait Catalog: Send + Sync {
    /// Children of `dir` in catalog order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Catalog`] when the level cannot be read. A
    /// directory the catalog does not know is an error, not an empty list.
    fn list(&self, dir: &CatalogPath) -> Result<Vec<CatalogEntry>>;
}

/// Set every directory entry's identity to the hash of that directory's own
/// listing, deepest levels first. Any change below a directory then changes
/// the identity of every ancestor, which is what lets the walker skip
/// committed subtrees.
///
/// # Errors
///
/// Returns [`crate::Error::Catalog`] for a directory entry whose listing is
/// missing.
pub(crate) fn derive_directory_identities(
    dirs: &mut BTreeMap<CatalogPath, Vec<CatalogEntry>>,
) -> Result<()> {
    let mut order: Vec<CatalogPath> = dirs.keys().cloned().collect();
    order.sort_by_key(|p| Reverse(p.depth()));

    let mut identities: HashMap<CatalogPath, ContentId> = HashMap::new();
    for path in order {
        let Some(entries) = dirs.get_mut(&path) else {
            continue;
        };
        for entry in entries.iter_mut().filter(|e| e.is_dir()) {
            let child = path.join(&entry.name)?;
            entry.identity = identities
                .get(&child)
                .copied()
                .ok_or_else(|| Error::catalog(&child, "directory without listing"))?;
        }
        let identity = ContentId::of(&serde_json::to_vec(&*entries)?);
        identities.insert(path, identity);
    }
    Ok(())
}
