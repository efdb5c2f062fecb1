//! Error types for uncvmfs-core

use std::path::PathBuf;

use uncvmfs_fs::{CatalogPath, ContentId};

/// Result type for uncvmfs-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run
///
/// Per-object failures during a sync are not represented here: they are
/// logged, counted in the report and retried on the next run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration file could not be used
    #[error("Configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Requested repository has no section in the configuration
    #[error("Repository {name} not found in {path}")]
    RepoNotFound { name: String, path: PathBuf },

    /// A catalog level could not be read
    #[error("Catalog error at {path}: {message}")]
    Catalog { path: CatalogPath, message: String },

    /// Fetching a new catalog snapshot failed
    #[error("Catalog update failed: {message}")]
    CatalogUpdate { message: String },

    /// Work was offered to a pool that has been shut down
    #[error("Download pool is shut down")]
    PoolClosed,

    /// A path handed to the packaging tool contains characters outside the allow-list
    #[error("Refusing to package unsafe path {path:?}")]
    UnsafePath { path: String },

    /// The packaging tool could not be started
    #[error("Packaging failed: {message}")]
    Packaging { message: String },

    /// The packaging tool ran and exited non-zero
    #[error("Packaging tool exited with status {code}")]
    PackagerExit { code: i32 },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from uncvmfs-fs
    #[error(transparent)]
    Fs(#[from] uncvmfs_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    /// HTTP client error
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn catalog(path: &CatalogPath, message: impl Into<String>) -> Self {
        Self::Catalog {
            path: path.clone(),
            message: message.into(),
        }
    }
}

/// Terminal failure of a single download task
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Fetch of {id} failed: {message}")]
    Fetch { id: ContentId, message: String },

    #[error("Content {id} is not available from the remote")]
    Missing { id: ContentId },

    #[error("Identity mismatch: expected {expected}, fetched {actual}")]
    Mismatch {
        expected: ContentId,
        actual: ContentId,
    },

    #[error("Worker panicked while fetching {id}")]
    Panicked { id: ContentId },

    #[error(transparent)]
    Fs(#[from] uncvmfs_fs::Error),

    #[error("Content store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
