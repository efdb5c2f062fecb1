//! In-memory catalog
//!
//! Useful for embedding and for exercising the sync engine without a remote.
//! Directory identities are derived from their listings, so any change below
//! a directory changes the identity of every ancestor.

use std::collections::{BTreeMap, BTreeSet};

use uncvmfs_fs::identity::IDENTITY_LEN;
use uncvmfs_fs::{CatalogPath, ContentId};

use super::{Catalog, CatalogEntry, Snapshot, derive_directory_identities};
use crate::{Error, Result};

const PENDING_IDENTITY: ContentId = ContentId::from_bytes([0; IDENTITY_LEN]);

/// Catalog held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    dirs: BTreeMap<CatalogPath, Vec<CatalogEntry>>,
    unreadable: BTreeSet<CatalogPath>,
}

impl MemoryCatalog {
    pub fn builder() -> MemoryCatalogBuilder {
        MemoryCatalogBuilder::default()
    }

    pub fn from_listings(dirs: BTreeMap<CatalogPath, Vec<CatalogEntry>>) -> Self {
        Self {
            dirs,
            unreadable: BTreeSet::new(),
        }
    }

    /// Make every later `list` of `path` fail.
    pub fn make_unreadable(&mut self, path: CatalogPath) {
        self.unreadable.insert(path);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: None,
            dirs: self.dirs.clone(),
        }
    }
}

impl Catalog for MemoryCatalog {
    fn list(&self, dir: &CatalogPath) -> Result<Vec<CatalogEntry>> {
        if self.unreadable.contains(dir) {
            return Err(Error::catalog(dir, "listing unavailable"));
        }
        self.dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| Error::catalog(dir, "no such directory"))
    }
}

#[derive(Debug, Clone)]
enum Node {
    Directory,
    Symlink(String),
    File(ContentId),
}

/// Builds a [`MemoryCatalog`] from slash-separated paths.
///
/// Missing parent directories are created implicitly. Adding a path twice
/// replaces the earlier node but keeps its position in the listing.
#[derive(Debug, Default)]
pub struct MemoryCatalogBuilder {
    nodes: Vec<(String, Node)>,
    blobs: BTreeMap<ContentId, Vec<u8>>,
}

impl MemoryCatalogBuilder {
    pub fn dir(mut self, path: &str) -> Self {
        self.nodes.push((path.to_string(), Node::Directory));
        self
    }

    /// Add a file and remember its content under its identity.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        let id = ContentId::of(content);
        self.blobs.insert(id, content.to_vec());
        self.nodes.push((path.to_string(), Node::File(id)));
        self
    }

    /// Add a file whose content is not known to the builder.
    pub fn file_with_identity(mut self, path: &str, id: ContentId) -> Self {
        self.nodes.push((path.to_string(), Node::File(id)));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.nodes
            .push((path.to_string(), Node::Symlink(target.to_string())));
        self
    }

    /// Content of every file added with [`Self::file`], keyed by identity.
    pub fn blobs(&self) -> &BTreeMap<ContentId, Vec<u8>> {
        &self.blobs
    }

    pub fn build(self) -> Result<MemoryCatalog> {
        let mut children: BTreeMap<CatalogPath, Vec<(String, Node)>> = BTreeMap::new();
        children.insert(CatalogPath::root(), Vec::new());

        for (raw, node) in self.nodes {
            let path = CatalogPath::parse(&raw)?;
            let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
                // The root itself always exists
                continue;
            };
            attach(&mut children, &parent, name, node)?;
        }

        let mut dirs = BTreeMap::new();
        for (path, nodes) in children {
            let entries: Vec<CatalogEntry> = nodes
                .into_iter()
                .map(|(name, node)| match node {
                    // Filled in from the listing below
                    Node::Directory => CatalogEntry::directory(name, PENDING_IDENTITY),
                    Node::Symlink(target) => CatalogEntry::symlink(name, target),
                    Node::File(id) => CatalogEntry::file(name, id),
                })
                .collect();
            dirs.insert(path, entries);
        }
        derive_directory_identities(&mut dirs)?;

        Ok(MemoryCatalog::from_listings(dirs))
    }
}

fn attach(
    children: &mut BTreeMap<CatalogPath, Vec<(String, Node)>>,
    parent: &CatalogPath,
    name: &str,
    node: Node,
) -> Result<()> {
    if !children.contains_key(parent)
        && let (Some(grandparent), Some(parent_name)) = (parent.parent(), parent.name())
    {
        attach(children, &grandparent, parent_name, Node::Directory)?;
    }

    let is_dir = matches!(node, Node::Directory);
    let listing = children.entry(parent.clone()).or_default();
    match listing.iter_mut().find(|(existing, _)| existing == name) {
        Some(slot) => slot.1 = node,
        None => listing.push((name.to_string(), node)),
    }

    let path = parent.join(name)?;
    if is_dir {
        children.entry(path).or_default();
    } else {
        // A directory turned into something else loses its listing
        children.retain(|p, _| !p.starts_with(&path));
    }
    Ok(())
}
