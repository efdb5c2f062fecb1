//! Repository configuration
//!
//! One TOML file may describe several mirrored repositories, each in its own
//! `[repos.<name>]` table:
//!
//! ```toml
//! [repos.software]
//! url = "http://stratum1.example.org/software"
//! dest = "/srv/mirror/software"
//! threads = 16
//! image = "/srv/images/software.sqfs"
//! exclude = ["/.cvmfs", "/scratch"]
//!
//! [repos.software.env]
//! ARCH = "x86_64"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use uncvmfs_fs::{Expander, io};

use crate::checkpoint::CheckpointStore;
use crate::download::{DEFAULT_QUEUE_PER_WORKER, DEFAULT_WORKERS, PoolOptions};
use crate::{Error, Result};

const DEFAULT_PACKAGER: &str = "mksquashfs";
const SNAPSHOT_FILE: &str = "catalog.json";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    repos: BTreeMap<String, RawRepo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepo {
    url: Option<String>,
    dest: Option<PathBuf>,
    store: Option<PathBuf>,
    state: Option<PathBuf>,
    threads: Option<usize>,
    queue: Option<usize>,
    image: Option<PathBuf>,
    #[serde(default)]
    exclude: Vec<String>,
    packager: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

/// Fully resolved settings of one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    /// Base URL of the remote repository
    pub url: String,
    /// Root of the mirrored tree
    pub dest: PathBuf,
    /// Content store directory
    pub store: PathBuf,
    /// Catalog snapshot and checkpoints
    pub state: PathBuf,
    pub threads: usize,
    pub queue: usize,
    /// Packaged image output; packaging is skipped when unset
    pub image: Option<PathBuf>,
    /// Path prefixes left out of the image
    pub exclude: Vec<String>,
    pub packager: String,
    /// Placeholder values for symlink targets
    pub env: BTreeMap<String, String>,
}

impl RepoConfig {
    /// Load the repository `name` from the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed or a
    /// value is invalid, and [`Error::RepoNotFound`] if it has no section for
    /// `name`.
    pub fn load(path: &Path, name: &str) -> Result<Self> {
        let content = io::read_text(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content, name, path)
    }

    /// Parse `content` as if it had been read from `source`.
    pub fn from_toml_str(content: &str, name: &str, source: &Path) -> Result<Self> {
        let invalid = |message: String| Error::Config {
            path: source.to_path_buf(),
            message,
        };

        let mut file: ConfigFile = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;
        let raw = file.repos.remove(name).ok_or_else(|| Error::RepoNotFound {
            name: name.to_string(),
            path: source.to_path_buf(),
        })?;

        let base = source.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

        let url = raw
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| invalid(format!("repos.{}.url is required", name)))?;
        let dest = raw
            .dest
            .map(resolve)
            .ok_or_else(|| invalid(format!("repos.{}.dest is required", name)))?;

        let state = raw
            .state
            .map(resolve)
            .unwrap_or_else(|| default_state_dir(&dest, name));
        let store = raw
            .store
            .map(resolve)
            .unwrap_or_else(|| state.join("store"));

        let threads = raw.threads.unwrap_or(DEFAULT_WORKERS);
        if threads == 0 {
            return Err(invalid(format!("repos.{}.threads must be at least 1", name)));
        }
        let queue = raw.queue.unwrap_or(threads * DEFAULT_QUEUE_PER_WORKER);
        if queue == 0 {
            return Err(invalid(format!("repos.{}.queue must be at least 1", name)));
        }

        Ok(Self {
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            dest,
            store,
            state,
            threads,
            queue,
            image: raw.image.map(resolve),
            exclude: raw.exclude,
            packager: raw.packager.unwrap_or_else(|| DEFAULT_PACKAGER.to_string()),
            env: raw.env,
        })
    }

    /// Replace the worker count, keeping the queue proportional to it.
    pub fn with_threads(mut self, threads: usize) -> Self {
        let threads = threads.max(1);
        self.queue = threads * DEFAULT_QUEUE_PER_WORKER;
        self.threads = threads;
        self
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions::new(self.threads).with_queue_bound(self.queue)
    }

    /// Expander for symlink targets: the `env` table, then the process
    /// environment.
    pub fn expander(&self) -> Expander {
        Expander::new(self.env.clone()).with_process_env()
    }

    /// Local copy of the catalog
    pub fn snapshot_path(&self) -> PathBuf {
        self.state.join(SNAPSHOT_FILE)
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(&self.state)
    }
}

/// `<dest>/../.<name>.uncvmfs`
fn default_state_dir(dest: &Path, name: &str) -> PathBuf {
    let hidden = format!(".{}.uncvmfs", name);
    match dest.parent() {
        Some(parent) => parent.join(hidden),
        None => dest.join(hidden),
    }
}
