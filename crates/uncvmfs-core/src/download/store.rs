//! Local content store
//!
//! Blobs are kept under `<root>/<hh>/<rest>` named by their identity. A blob
//! only ever appears there after its bytes were verified, so presence is
//! enough to reuse it. Downloads land in uniquely named temporary files under
//! `<root>/tmp` and are promoted with an atomic rename, which keeps concurrent
//! fetches of the same identity from tearing each other's writes.

use std::fs::{self, Permissions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, warn};
use uncvmfs_fs::{ContentId, Error as FsError};

use super::Fetcher;
use crate::error::DownloadError;

/// Permissions of promoted blobs; hard links into the tree share them
const BLOB_MODE: u32 = 0o644;

/// Attempts per identity when fetched bytes do not match
const FETCH_ATTEMPTS: usize = 2;

/// Identity-addressed blob cache shared by all pool workers
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: &Path) -> uncvmfs_fs::Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
        };
        let tmp = store.tmp_dir();
        fs::create_dir_all(&tmp).map_err(|e| FsError::io(&tmp, e))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn path_for(&self, id: &ContentId) -> PathBuf {
        let (head, tail) = id.fan_out();
        self.root.join(head).join(tail)
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        fs::symlink_metadata(self.path_for(id)).is_ok_and(|meta| meta.is_file())
    }

    /// Path of `id` in the store, fetching it first if it is not there yet.
    pub fn ensure(&self, id: &ContentId, fetcher: &dyn Fetcher) -> Result<PathBuf, DownloadError> {
        if self.contains(id) {
            debug!(%id, "content store hit");
            return Ok(self.path_for(id));
        }
        self.ingest(id, fetcher)
    }

    /// Fetch `id`, verify it and promote it into the store.
    ///
    /// A mismatching download is discarded and fetched once more before the
    /// mismatch is reported.
    pub fn ingest(&self, id: &ContentId, fetcher: &dyn Fetcher) -> Result<PathBuf, DownloadError> {
        let mut last_mismatch = None;

        for attempt in 1..=FETCH_ATTEMPTS {
            let mut temp = Builder::new()
                .prefix(&format!("{}.", id.to_hex()))
                .suffix(".part")
                .tempfile_in(self.tmp_dir())?;

            let size = fetcher.fetch(id, temp.as_file_mut())?;
            temp.as_file_mut().flush()?;
            temp.as_file_mut().seek(SeekFrom::Start(0))?;
            let actual = ContentId::of_reader(temp.as_file_mut())?;

            if actual != *id {
                warn!(%id, %actual, attempt, "fetched content does not match its identity");
                last_mismatch = Some(actual);
                // Dropping the temp file removes it
                continue;
            }

            let final_path = self.path_for(id);
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
            }
            temp.as_file()
                .set_permissions(Permissions::from_mode(BLOB_MODE))?;
            temp.persist(&final_path).map_err(|e| FsError::io(&final_path, e.error))?;

            debug!(%id, size, "content promoted into store");
            return Ok(final_path);
        }

        Err(DownloadError::Mismatch {
            expected: *id,
            actual: last_mismatch.unwrap_or(*id),
        })
    }
}
