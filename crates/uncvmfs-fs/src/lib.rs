//! Filesystem layer for uncvmfs
//!
//! Provides the object applier that turns diff decisions into directories,
//! symlinks and files on disk, together with the primitives the rest of the
//! workspace builds on: content identities, catalog-relative paths, symlink
//! placeholder expansion and atomic writes.

pub mod apply;
pub mod error;
pub mod expand;
pub mod identity;
pub mod io;
pub mod path;

pub use apply::{LinkMode, Placement};
pub use error::{Error, Result};
pub use expand::Expander;
pub use identity::ContentId;
pub use path::{CatalogPath, validate_entry_name};
