//! Filesystem object applier
//!
//! Synchronous operations that create and remove directories, symlinks and
//! files in the destination tree. Every creation tolerates stale leftovers of
//! an interrupted earlier run: it attempts once, clears whatever is in the
//! way, and attempts exactly once more before reporting an error.
//!
//! Two removal operations exist on purpose:
//! - [`clear_obstruction`] is best effort and never fails. It is only used to
//!   make room before a creation attempt.
//! - [`delete`] is used for catalog-driven removals and reports every failure
//!   except the object already being gone.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::{Error, Expander, Result};

/// Permissions applied to every directory the applier creates
pub const DIRECTORY_MODE: u32 = 0o755;

/// Outcome of a directory creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Created,
    /// A directory was already there, which counts as success.
    AlreadyPresent,
}

/// How file content ended up at its target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    HardLink,
    /// Hard-linking failed (typically across filesystems), the bytes were copied.
    Copy,
}

/// Remove whatever object is at `path`, ignoring absence and failure.
pub fn clear_obstruction(path: &Path) {
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = removed {
        debug!(path = %path.display(), error = %e, "could not clear obstruction");
    }
}

/// Remove a file or symlink with a single unlink, or a directory recursively.
///
/// An object that is already absent counts as deleted.
pub fn delete(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(path, e)),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Attempt; on failure clear the obstruction; attempt once more.
fn attempt_twice<T>(path: &Path, mut attempt: impl FnMut() -> io::Result<T>) -> Result<T> {
    match attempt() {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(path = %path.display(), error = %first, "creation failed, retrying after tidy");
            clear_obstruction(path);
            attempt().map_err(|e| Error::io(path, e))
        }
    }
}

/// Create a traversable directory at `path`.
///
/// An existing directory is left alone; any other object is cleared first.
pub fn create_directory(path: &Path) -> Result<Placement> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(Placement::AlreadyPresent),
        Ok(_) => clear_obstruction(path),
        Err(_) => {}
    }

    attempt_twice(path, || {
        fs::create_dir(path)?;
        fs::set_permissions(path, Permissions::from_mode(DIRECTORY_MODE))
    })?;
    Ok(Placement::Created)
}

/// Create a symlink at `path` pointing at the expanded `template`.
///
/// Returns the target the link was created with.
pub fn create_symlink(path: &Path, template: &str, expander: &Expander) -> Result<String> {
    let target = expander.expand(template);
    clear_obstruction(path);
    attempt_twice(path, || std::os::unix::fs::symlink(&target, path))?;
    Ok(target)
}

/// Materialise `source` at `path`, hard-linking when possible.
pub fn place_file(source: &Path, path: &Path) -> Result<LinkMode> {
    clear_obstruction(path);
    attempt_twice(path, || link_or_copy(source, path))
}

fn link_or_copy(source: &Path, path: &Path) -> io::Result<LinkMode> {
    match fs::hard_link(source, path) {
        Ok(()) => Ok(LinkMode::HardLink),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!(source = %source.display(), error = %e, "hard link unavailable, copying");
            fs::copy(source, path)?;
            Ok(LinkMode::Copy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clear_obstruction_ignores_missing_path() {
        let temp = TempDir::new().unwrap();
        clear_obstruction(&temp.path().join("nothing"));
    }

    #[test]
    fn attempt_twice_stops_after_second_failure() {
        let temp = TempDir::new().unwrap();
        let mut attempts = 0;
        let result: Result<()> = attempt_twice(&temp.path().join("target"), || {
            attempts += 1;
            Err(io::Error::other("still broken"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn attempt_twice_returns_first_success() {
        let temp = TempDir::new().unwrap();
        let mut attempts = 0;
        let value = attempt_twice(&temp.path().join("target"), || {
            attempts += 1;
            Ok(attempts)
        })
        .unwrap();
        assert_eq!(value, 1);
    }
}
