//! SyncEngine implementation
//!
//! The engine runs the [`Walker`] on the calling thread and applies each
//! step as it arrives. Directories and symlinks are created synchronously;
//! files are handed to the [`DownloadPool`] and only waited for when a level
//! is finalized, so downloads for one level overlap with the filesystem work
//! of the next.
//!
//! Per-object failures are logged and counted but never abort the run. A
//! failed level still commits what did succeed, and its own entry is dropped
//! from its parent's checkpoint so the next run descends into it again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uncvmfs_fs::{CatalogPath, Expander, Placement, apply};

use super::walker::{Pass, Seen, Step, Walker};
use crate::catalog::{Catalog, CatalogEntry};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::RepoConfig;
use crate::download::{Completion, ContentStore, DownloadPool, DownloadTask, Fetcher, SubmitError};
use crate::{Error, Result};

/// Report from a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Checkpoints written
    pub levels_committed: usize,
    pub dirs_created: usize,
    pub links_created: usize,
    pub files_placed: usize,
    pub deleted: usize,
    /// Entries that needed no work
    pub unchanged: usize,
    /// Per-object failures, retried on the next run
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Whether every object was applied
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of objects created, placed or deleted
    pub fn mutations(&self) -> usize {
        self.dirs_created + self.links_created + self.files_placed + self.deleted
    }
}

/// Bookkeeping for one level between its structure and finalize steps
#[derive(Debug, Default)]
struct Level {
    /// This level's entry in its parent; `None` for the root
    entry: Option<CatalogEntry>,
    prior: BTreeMap<String, CatalogEntry>,
    /// What will be committed; starts as `prior`
    record: BTreeMap<String, CatalogEntry>,
    subdirs: HashMap<String, CatalogEntry>,
    in_flight: HashMap<String, CatalogEntry>,
    failed: bool,
}

#[derive(Debug, Default)]
struct Run {
    levels: HashMap<CatalogPath, Level>,
    report: SyncReport,
}

impl Run {
    fn complete(&mut self, completion: Completion) {
        let Completion { task, result } = completion;
        let (Some(parent), Some(name)) = (task.path.parent(), task.path.name()) else {
            return;
        };
        let Some(level) = self.levels.get_mut(&parent) else {
            warn!(path = %task.path, "completion for a level that is no longer open");
            return;
        };

        let entry = level.in_flight.remove(name);
        match result {
            Ok(_) => {
                if let Some(entry) = entry {
                    level.record.insert(name.to_string(), entry);
                }
                self.report.files_placed += 1;
            }
            Err(e) => {
                level.failed = true;
                failure(&mut self.report, "download", &task.path, e);
            }
        }
    }
}

fn failure(report: &mut SyncReport, action: &str, path: &CatalogPath, e: impl Display) {
    error!(%path, error = %e, "{} failed", action);
    report.errors.push(format!("{} {}: {}", action, path, e));
}

/// Engine for mirroring a catalog into a destination tree
pub struct SyncEngine {
    dest: PathBuf,
    checkpoints: CheckpointStore,
    expander: Expander,
    pool: DownloadPool,
}

impl SyncEngine {
    pub fn new(
        dest: &Path,
        checkpoints: CheckpointStore,
        expander: Expander,
        pool: DownloadPool,
    ) -> Self {
        Self {
            dest: dest.to_path_buf(),
            checkpoints,
            expander,
            pool,
        }
    }

    /// Build an engine with the pool, store and checkpoints described by
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the content store cannot be created.
    pub fn from_config(config: &RepoConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let store = ContentStore::open(&config.store)?;
        let pool = DownloadPool::new(config.pool_options(), store, fetcher);
        Ok(Self::new(
            &config.dest,
            config.checkpoints(),
            config.expander(),
            pool,
        ))
    }

    /// Bring the destination tree in line with `catalog`.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination root cannot be created, a catalog
    /// level cannot be read or a checkpoint cannot be written. Checkpoints
    /// committed before the failure stay valid.
    pub fn run(mut self, catalog: &dyn Catalog) -> Result<SyncReport> {
        info!(dest = %self.dest.display(), workers = self.pool.worker_count(), "sync started");
        apply::create_directory(&self.dest)?;

        let mut run = Run::default();
        let outcome = self.walk(catalog, &mut run);

        self.pool.wait_idle();
        self.drain(&mut run);
        self.pool.shutdown();
        outcome?;

        let report = run.report;
        info!(
            committed = report.levels_committed,
            dirs = report.dirs_created,
            links = report.links_created,
            files = report.files_placed,
            deleted = report.deleted,
            unchanged = report.unchanged,
            failed = report.errors.len(),
            "sync finished"
        );
        Ok(report)
    }

    fn walk(&self, catalog: &dyn Catalog, run: &mut Run) -> Result<()> {
        let mut walker = Walker::new(catalog, &self.checkpoints, &self.dest);
        while let Some(step) = walker.next() {
            let step = step?;
            match step.pass {
                Pass::Structure => {
                    for path in self.apply_structure(&step, run)? {
                        walker.prune(&path);
                    }
                }
                Pass::Content => self.apply_content(&step, run)?,
                Pass::Finalize => self.finalize(&step.level, run)?,
            }
        }
        Ok(())
    }

    /// Open the level and create its child directories. Returns the children
    /// that could not be created.
    fn apply_structure(&self, step: &Step, run: &mut Run) -> Result<Vec<CatalogPath>> {
        let entry = match (step.level.parent(), step.level.name()) {
            (Some(parent), Some(name)) => run
                .levels
                .get(&parent)
                .and_then(|level| level.subdirs.get(name))
                .cloned(),
            _ => None,
        };
        let prior = self.checkpoints.entries(&step.level)?;
        let mut level = Level {
            entry,
            record: prior.clone(),
            prior,
            ..Level::default()
        };

        let mut pruned = Vec::new();
        for decision in &step.dirs {
            let name = &decision.entry.name;
            let path = step.level.join(name)?;
            level.subdirs.insert(name.clone(), decision.entry.clone());

            if decision.seen != Seen::Create {
                run.report.unchanged += 1;
                continue;
            }
            match apply::create_directory(&path.to_native(&self.dest)) {
                Ok(Placement::Created) => {
                    debug!(%path, "directory created");
                    run.report.dirs_created += 1;
                }
                Ok(Placement::AlreadyPresent) => run.report.unchanged += 1,
                Err(e) => {
                    level.failed = true;
                    level.record.remove(name);
                    failure(&mut run.report, "mkdir", &path, e);
                    pruned.push(path);
                }
            }
        }

        run.levels.insert(step.level.clone(), level);
        Ok(pruned)
    }

    /// Deletes first, then symlinks, then file submissions.
    fn apply_content(&self, step: &Step, run: &mut Run) -> Result<()> {
        let mut tasks = Vec::new();
        {
            let Run { levels, report } = &mut *run;
            let level = levels
                .get_mut(&step.level)
                .ok_or_else(|| Error::catalog(&step.level, "content before structure"))?;
            report.unchanged += step
                .decisions()
                .filter(|d| d.seen == Seen::Unchanged)
                .count();

            let mut blocked = HashSet::new();
            for decision in step.decisions().filter(|d| d.seen == Seen::Delete) {
                let name = &decision.entry.name;
                let path = step.level.join(name)?;
                match self.delete(&path, &decision.entry) {
                    Ok(()) => {
                        debug!(%path, kind = ?decision.entry.kind, "deleted");
                        level.record.remove(name);
                        report.deleted += 1;
                    }
                    Err(e) => {
                        level.failed = true;
                        blocked.insert(name.clone());
                        failure(report, "delete", &path, e);
                    }
                }
            }

            for decision in step.links.iter().filter(|d| d.seen == Seen::Create) {
                let name = &decision.entry.name;
                if blocked.contains(name) {
                    continue;
                }
                let path = step.level.join(name)?;
                let template = decision.entry.target.as_deref().unwrap_or_default();
                level.record.remove(name);
                match apply::create_symlink(&path.to_native(&self.dest), template, &self.expander) {
                    Ok(target) => {
                        debug!(%path, %target, "symlink created");
                        level.record.insert(name.clone(), decision.entry.clone());
                        report.links_created += 1;
                    }
                    Err(e) => {
                        level.failed = true;
                        failure(report, "symlink", &path, e);
                    }
                }
            }

            for decision in step.files.iter().filter(|d| d.seen == Seen::Create) {
                let name = &decision.entry.name;
                if blocked.contains(name) {
                    continue;
                }
                let path = step.level.join(name)?;
                level.record.remove(name);
                level.in_flight.insert(name.clone(), decision.entry.clone());
                tasks.push(DownloadTask {
                    target: path.to_native(&self.dest),
                    path,
                    identity: decision.entry.identity,
                });
            }
        }

        for task in tasks {
            self.submit(task, run)?;
        }
        self.drain(run);
        Ok(())
    }

    fn delete(&self, path: &CatalogPath, entry: &CatalogEntry) -> Result<()> {
        apply::delete(&path.to_native(&self.dest))?;
        if entry.is_dir() {
            self.checkpoints.forget_subtree(path)?;
        }
        Ok(())
    }

    /// Submit, draining completions while the queue pushes back.
    fn submit(&self, mut task: DownloadTask, run: &mut Run) -> Result<()> {
        loop {
            match self.pool.submit(task) {
                Ok(()) => return Ok(()),
                Err(SubmitError::Closed(_)) => return Err(Error::PoolClosed),
                Err(rejected) => {
                    task = rejected.into_task();
                    match self.pool.wait_completed() {
                        Some(completion) => run.complete(completion),
                        None => self.pool.wait_idle(),
                    }
                }
            }
        }
    }

    fn drain(&self, run: &mut Run) {
        while let Some(completion) = self.pool.poll_completed() {
            run.complete(completion);
        }
    }

    /// Wait for outstanding downloads, commit the level and report it to its
    /// parent.
    fn finalize(&self, path: &CatalogPath, run: &mut Run) -> Result<()> {
        self.pool.wait_idle();
        self.drain(run);

        let level = run
            .levels
            .remove(path)
            .ok_or_else(|| Error::catalog(path, "level finalized before it was opened"))?;

        if level.record != level.prior {
            let checkpoint = Checkpoint::new(path.clone(), level.record.values().cloned());
            self.checkpoints.commit(&checkpoint)?;
            run.report.levels_committed += 1;
            debug!(level = %path, entries = level.record.len(), failed = level.failed, "checkpoint committed");
        }

        if let (Some(parent), Some(name)) = (path.parent(), path.name())
            && let Some(up) = run.levels.get_mut(&parent)
        {
            match level.entry {
                Some(entry) if !level.failed => {
                    up.record.insert(name.to_string(), entry);
                }
                _ => {
                    up.record.remove(name);
                    up.failed = true;
                }
            }
        }
        Ok(())
    }
}
