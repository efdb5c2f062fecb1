//! Catalog update
//!
//! Downloads the remote catalog document and replaces the local snapshot.
//! The new document is validated before it is written, so a broken download
//! leaves the previous snapshot in place.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::info;
use uncvmfs_fs::io;

use crate::catalog::ManifestCatalog;
use crate::config::RepoConfig;
use crate::{Error, Result};

/// Location of the catalog document below the repository URL
pub const CATALOG_ENDPOINT: &str = ".uncvmfs/catalog.json";

const UPDATE_TIMEOUT: Duration = Duration::from_secs(120);

pub fn catalog_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), CATALOG_ENDPOINT)
}

/// Fetch the catalog of `config.url` and install it as the local snapshot.
///
/// # Errors
///
/// Returns [`Error::CatalogUpdate`] if the remote cannot be reached or
/// answers with an error status, and a catalog error if the document is not
/// a valid snapshot.
pub fn update_catalog(config: &RepoConfig) -> Result<ManifestCatalog> {
    let url = catalog_url(&config.url);
    info!(%url, "updating catalog");

    let client = Client::builder().timeout(UPDATE_TIMEOUT).build()?;
    let failed = |e: reqwest::Error| Error::CatalogUpdate {
        message: format!("{}: {}", url, e),
    };
    let bytes = client
        .get(&url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(failed)?;

    install_snapshot(&bytes, &config.snapshot_path())
}

/// Validate `bytes` as a snapshot and atomically write them to `path`.
pub fn install_snapshot(bytes: &[u8], path: &Path) -> Result<ManifestCatalog> {
    let catalog = ManifestCatalog::from_slice(bytes)?;
    io::write_atomic(path, bytes)?;
    info!(
        snapshot = %path.display(),
        revision = ?catalog.revision(),
        "catalog snapshot installed"
    );
    Ok(catalog)
}
