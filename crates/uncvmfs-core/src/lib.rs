//! Sync engine for uncvmfs
//!
//! This crate mirrors a remote content-addressed catalog into a local
//! directory tree, incrementally and resumably:
//!
//! - **Catalog**: listing access to the remote tree, from a JSON snapshot or
//!   from memory
//! - **Walker**: per-level classification of entries into unchanged,
//!   to-create and to-delete
//! - **Download pool**: bounded worker threads filling a shared content store
//! - **SyncEngine**: applies the walk and commits per-level checkpoints
//! - **Packaging**: optional read-only image of the finished tree
//!
//! # Architecture
//!
//! ```text
//!              uncvmfs-cli
//!                   |
//!              uncvmfs-core
//!   catalog -> sync::Walker -> sync::SyncEngine -> checkpoint
//!                                  |
//!                           download::DownloadPool
//!                                  |
//!                              uncvmfs-fs
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod download;
pub mod error;
pub mod package;
pub mod sync;
pub mod update;

pub use catalog::{Catalog, CatalogEntry, EntryKind, ManifestCatalog, MemoryCatalog, Snapshot};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::RepoConfig;
pub use download::{
    Completion, ContentStore, DownloadPool, DownloadTask, Fetcher, HttpFetcher, MemoryFetcher,
    PoolOptions, SubmitError,
};
pub use error::{DownloadError, Error, Result};
pub use sync::{Decision, Pass, Seen, Step, SyncEngine, SyncReport, Walker};
