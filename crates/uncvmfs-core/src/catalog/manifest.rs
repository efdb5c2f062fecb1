//! JSON catalog snapshots
//!
//! The catalog update step stores the remote catalog as one JSON document in
//! the state directory. [`ManifestCatalog`] serves listings from it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uncvmfs_fs::{CatalogPath, io, validate_entry_name};

use super::{Catalog, CatalogEntry, EntryKind, derive_directory_identities};
use crate::{Error, Result};

/// Serialized form of a whole catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Remote revision the snapshot was taken at, if the remote reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// Listing of every directory, keyed by catalog path
    pub dirs: BTreeMap<CatalogPath, Vec<CatalogEntry>>,
}

impl Snapshot {
    /// Check the structural rules the walker relies on.
    pub fn validate(&self) -> Result<()> {
        let root = CatalogPath::root();
        if !self.dirs.contains_key(&root) {
            return Err(Error::catalog(&root, "snapshot has no root listing"));
        }
        for (dir, entries) in &self.dirs {
            for entry in entries {
                validate_entry_name(&entry.name)?;
                if entry.kind == EntryKind::Symlink && entry.target.is_none() {
                    return Err(Error::catalog(
                        dir,
                        format!("symlink {} has no target", entry.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Catalog backed by a [`Snapshot`]
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    snapshot: Snapshot,
}

impl ManifestCatalog {
    /// Validate `snapshot` and derive its directory identities from the
    /// listings. Directory identities sent by the remote are not trusted.
    pub fn new(mut snapshot: Snapshot) -> Result<Self> {
        snapshot.validate()?;
        derive_directory_identities(&mut snapshot.dirs)?;
        Ok(Self { snapshot })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(serde_json::from_slice(bytes)?)
    }

    /// Load the snapshot stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        let text = io::read_text(path)?;
        Self::from_slice(text.as_bytes())
    }

    pub fn revision(&self) -> Option<u64> {
        self.snapshot.revision
    }
}

impl Catalog for ManifestCatalog {
    fn list(&self, dir: &CatalogPath) -> Result<Vec<CatalogEntry>> {
        self.snapshot
            .dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| Error::catalog(dir, "no such directory in snapshot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use uncvmfs_fs::ContentId;

    #[test]
    fn snapshot_round_trips_through_json() {
        let memory = MemoryCatalog::builder()
            .file("a/f", b"content")
            .symlink("a/l", "/opt/$(ARCH)")
            .build()
            .unwrap();
        let json = serde_json::to_vec(&memory.snapshot()).unwrap();

        let catalog = ManifestCatalog::from_slice(&json).unwrap();
        let a = CatalogPath::parse("a").unwrap();
        assert_eq!(catalog.list(&a).unwrap(), memory.list(&a).unwrap());
    }

    #[test]
    fn snapshot_without_root_is_rejected() {
        let json = br#"{ "dirs": { "/a": [] } }"#;
        assert!(ManifestCatalog::from_slice(json).is_err());
    }

    #[test]
    fn symlink_without_target_is_rejected() {
        let id = uncvmfs_fs::ContentId::of(b"x").to_hex();
        let json = format!(
            r#"{{ "dirs": {{ "/": [ {{ "name": "l", "kind": "symlink", "identity": "{}" }} ] }} }}"#,
            id
        );
        assert!(ManifestCatalog::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn entry_names_are_validated() {
        let id = uncvmfs_fs::ContentId::of(b"x").to_hex();
        let json = format!(
            r#"{{ "dirs": {{ "/": [ {{ "name": "..", "kind": "file", "identity": "{}" }} ] }} }}"#,
            id
        );
        assert!(ManifestCatalog::from_slice(json.as_bytes()).is_err());
    }

    fn listing(dir_identity: &str, file: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "dirs": {
                "/": [ { "name": "a", "kind": "directory", "identity": dir_identity } ],
                "/a": [ { "name": "f", "kind": "file", "identity": ContentId::of(file).to_hex() } ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn directory_identity_follows_its_listing() {
        let zero = "0".repeat(64);
        let one = ManifestCatalog::from_slice(&listing(&zero, b"one")).unwrap();
        let two = ManifestCatalog::from_slice(&listing(&zero, b"two")).unwrap();

        let root = CatalogPath::root();
        let (a1, a2) = (&one.list(&root).unwrap()[0], &two.list(&root).unwrap()[0]);
        assert_ne!(a1.identity, a2.identity);
        assert_ne!(a1.identity.to_hex(), zero);

        let memory = MemoryCatalog::builder().file("a/f", b"one").build().unwrap();
        assert_eq!(a1, &memory.list(&root).unwrap()[0]);
    }

    #[test]
    fn directory_without_listing_is_rejected() {
        let json = serde_json::json!({
            "dirs": { "/": [ { "name": "a", "kind": "directory", "identity": "0".repeat(64) } ] }
        });
        let err = ManifestCatalog::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Catalog { .. }));
    }
}
