//! Packaging of the mirrored tree into a read-only image
//!
//! The external tool is invoked as
//! `<packager> <dest> <image>.tmp -noappend -ef <exclusions>` and the result
//! is renamed into place only when it exits successfully.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::{Error, Result};

static SAFE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-_./,]+$").unwrap());

/// Refuse paths with characters outside `[A-Za-z0-9-_./,]`.
pub fn check_safe(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if SAFE_PATH.is_match(&text) {
        Ok(())
    } else {
        Err(Error::UnsafePath {
            path: text.into_owned(),
        })
    }
}

/// Write `exclude` to a temporary list file, one entry per line with any
/// leading separators removed.
pub fn write_exclusions(exclude: &[String]) -> Result<NamedTempFile> {
    let mut list = tempfile::Builder::new()
        .prefix("uncvmfs-exclude.")
        .suffix(".txt")
        .tempfile()?;
    for entry in exclude {
        let relative = entry.trim_start_matches('/');
        if !relative.is_empty() {
            writeln!(list, "{}", relative)?;
        }
    }
    list.flush()?;
    Ok(list)
}

/// `<image>.tmp`
fn staging_path(image: &Path) -> PathBuf {
    let mut staged = image.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

/// Package `config.dest` into `image`.
///
/// # Errors
///
/// Returns [`Error::UnsafePath`] before running anything if either path is
/// refused, [`Error::Packaging`] if the tool cannot be started and
/// [`Error::PackagerExit`] if it exits non-zero.
pub fn build_image(config: &RepoConfig, image: &Path) -> Result<()> {
    check_safe(&config.dest)?;
    check_safe(image)?;

    let exclusions = write_exclusions(&config.exclude)?;
    let staged = staging_path(image);
    if let Some(parent) = image.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| uncvmfs_fs::Error::io(parent, e))?;
    }

    info!(image = %image.display(), packager = %config.packager, "packaging");
    let status = Command::new(&config.packager)
        .arg(&config.dest)
        .arg(&staged)
        .arg("-noappend")
        .arg("-ef")
        .arg(exclusions.path())
        .status()
        .map_err(|e| Error::Packaging {
            message: format!("could not run {}: {}", config.packager, e),
        })?;

    if !status.success() {
        let _ = fs::remove_file(&staged);
        return Err(Error::PackagerExit {
            code: status.code().unwrap_or(1),
        });
    }

    fs::rename(&staged, image).map_err(|e| uncvmfs_fs::Error::io(image, e))?;
    debug!(image = %image.display(), "image renamed into place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_appends_suffix() {
        assert_eq!(
            staging_path(Path::new("/srv/sw.sqfs")),
            Path::new("/srv/sw.sqfs.tmp")
        );
    }

    #[test]
    fn exclusions_are_made_relative() {
        let list = write_exclusions(&["/a/b".to_string(), "//c".to_string(), "/".to_string()])
            .unwrap();
        assert_eq!(fs::read_to_string(list.path()).unwrap(), "a/b\nc\n");
    }
}
