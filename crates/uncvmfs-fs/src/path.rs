//! Catalog-relative paths
//!
//! Every object in the mirrored tree is addressed by its path relative to the
//! repository root. Paths are stored as their validated components and only
//! turned into native paths when joined onto a destination root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// A path inside the catalog, relative to the repository root.
///
/// The empty path is the root directory. Displayed with a leading slash
/// (`/`, `/a/b`) the way catalog paths are usually written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatalogPath {
    components: Vec<String>,
}

/// Check that `name` can be used as a single path component.
///
/// Rejects empty names, `.` and `..`, and names containing a separator or a
/// NUL byte.
pub fn validate_entry_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty name"
    } else if name == "." || name == ".." {
        "relative component"
    } else if name.contains('/') {
        "contains a path separator"
    } else if name.contains('\0') {
        "contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

impl CatalogPath {
    /// The repository root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path. Leading, trailing and repeated slashes
    /// are ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let mut components = Vec::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            validate_entry_name(part)?;
            components.push(part.to_string());
        }
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Append a single entry name.
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_entry_name(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// The containing directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, head) = self.components.split_last()?;
        Some(Self {
            components: head.to_vec(),
        })
    }

    /// The last component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Whether `self` is `other` or lies underneath it.
    pub fn starts_with(&self, other: &CatalogPath) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Resolve against a native base directory.
    pub fn to_native(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        path.extend(&self.components);
        path
    }
}

impl std::fmt::Display for CatalogPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for CatalogPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CatalogPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CatalogPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
