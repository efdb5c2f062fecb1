//! Error types for uncvmfs-cli

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Errors that end a CLI run
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Error from uncvmfs-core
    #[error(transparent)]
    Core(#[from] uncvmfs_core::Error),

    /// Error from uncvmfs-fs
    #[error(transparent)]
    Fs(#[from] uncvmfs_fs::Error),

    /// Some objects could not be synced; they are retried on the next run
    #[error("{failed} object(s) failed to sync")]
    Incomplete { failed: usize },
}

impl CliError {
    /// Process exit status for this error.
    ///
    /// A packaging tool that ran and failed passes its own status through;
    /// everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(uncvmfs_core::Error::PackagerExit { code }) => *code,
            _ => 1,
        }
    }
}
