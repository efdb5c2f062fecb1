//! Catalog diff walker
//!
//! Walks the catalog depth first and compares every level against its last
//! committed checkpoint and against what is actually on disk. Each level
//! yields three [`Step`]s:
//!
//! 1. [`Pass::Structure`]: child directories, unchanged or to create. Nothing
//!    is deleted here so a directory being replaced keeps its content until
//!    the level's content pass.
//! 2. [`Pass::Content`]: symlinks and files to create or keep, plus every
//!    object to delete at this level (in the list matching its old kind).
//! 3. [`Pass::Finalize`]: no work; the level may be committed.
//!
//! The finalize step of a level is emitted after the steps of all of its
//! descendants, so a committed directory identity always covers a complete
//! subtree. A directory that is on disk and whose identity equals the
//! committed one is therefore not descended into at all.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uncvmfs_fs::CatalogPath;

use crate::Result;
use crate::catalog::{Catalog, CatalogEntry, EntryKind};
use crate::checkpoint::CheckpointStore;

/// Which of a level's three passes a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Structure,
    Content,
    Finalize,
}

/// Classification of one entry for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Seen {
    Unchanged,
    Create,
    Delete,
}

/// A classified entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub entry: CatalogEntry,
    pub seen: Seen,
}

impl Decision {
    fn new(entry: CatalogEntry, seen: Seen) -> Self {
        Self { entry, seen }
    }
}

/// One pass over one directory level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub level: CatalogPath,
    pub pass: Pass,
    pub dirs: Vec<Decision>,
    pub links: Vec<Decision>,
    pub files: Vec<Decision>,
}

impl Step {
    fn empty(level: CatalogPath, pass: Pass) -> Self {
        Self {
            level,
            pass,
            dirs: Vec::new(),
            links: Vec::new(),
            files: Vec::new(),
        }
    }

    fn push(&mut self, decision: Decision) {
        match decision.entry.kind {
            EntryKind::Directory => self.dirs.push(decision),
            EntryKind::Symlink => self.links.push(decision),
            EntryKind::File => self.files.push(decision),
        }
    }

    /// All decisions of this step in dirs, links, files order
    pub fn decisions(&self) -> impl Iterator<Item = &Decision> {
        self.dirs.iter().chain(&self.links).chain(&self.files)
    }

    pub fn is_noop(&self) -> bool {
        self.decisions().all(|d| d.seen == Seen::Unchanged)
    }
}

#[derive(Debug)]
enum Work {
    Enter(CatalogPath),
    Finalize(CatalogPath),
}

/// Lazy sequence of [`Step`]s over a catalog.
///
/// Yields `Err` at most once: a level that cannot be read ends the walk.
pub struct Walker<'a> {
    catalog: &'a dyn Catalog,
    checkpoints: &'a CheckpointStore,
    dest: PathBuf,
    stack: Vec<Work>,
    pending: VecDeque<Step>,
}

impl<'a> Walker<'a> {
    pub fn new(catalog: &'a dyn Catalog, checkpoints: &'a CheckpointStore, dest: &Path) -> Self {
        Self {
            catalog,
            checkpoints,
            dest: dest.to_path_buf(),
            stack: vec![Work::Enter(CatalogPath::root())],
            pending: VecDeque::new(),
        }
    }

    /// Do not descend into `path`; used when its directory could not be
    /// created. The level's ancestors are still finalized.
    pub fn prune(&mut self, path: &CatalogPath) {
        self.stack
            .retain(|work| !matches!(work, Work::Enter(p) if p.starts_with(path)));
    }

    fn enter(&mut self, level: &CatalogPath) -> Result<(Step, Step, Vec<CatalogPath>)> {
        let listing = self.catalog.list(level)?;
        let prior = self.checkpoints.entries(level)?;
        let level_dir = level.to_native(&self.dest);

        let (structure, children) = classify_structure(level, &listing, &prior, &level_dir)?;
        let content = classify_content(level, &listing, &prior, &level_dir);

        debug!(
            %level,
            children = children.len(),
            changes = content.decisions().filter(|d| d.seen != Seen::Unchanged).count(),
            "level classified"
        );
        Ok((structure, content, children))
    }
}

impl Iterator for Walker<'_> {
    type Item = Result<Step>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(step) = self.pending.pop_front() {
            return Some(Ok(step));
        }

        match self.stack.pop()? {
            Work::Finalize(level) => Some(Ok(Step::empty(level, Pass::Finalize))),
            Work::Enter(level) => match self.enter(&level) {
                Ok((structure, content, children)) => {
                    self.stack.push(Work::Finalize(level));
                    self.stack
                        .extend(children.into_iter().rev().map(Work::Enter));
                    self.pending.push_back(content);
                    Some(Ok(structure))
                }
                Err(e) => {
                    self.stack.clear();
                    Some(Err(e))
                }
            },
        }
    }
}

/// Kind of object currently at `path`, not following symlinks
fn disk_kind(path: &Path) -> Option<EntryKind> {
    let meta = fs::symlink_metadata(path).ok()?;
    let kind = if meta.is_dir() {
        EntryKind::Directory
    } else if meta.file_type().is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    Some(kind)
}

fn classify_structure(
    level: &CatalogPath,
    listing: &[CatalogEntry],
    prior: &BTreeMap<String, CatalogEntry>,
    level_dir: &Path,
) -> Result<(Step, Vec<CatalogPath>)> {
    let mut step = Step::empty(level.clone(), Pass::Structure);
    let mut children = Vec::new();

    for entry in listing.iter().filter(|e| e.is_dir()) {
        let on_disk = disk_kind(&level_dir.join(&entry.name)) == Some(EntryKind::Directory);
        let seen = if on_disk { Seen::Unchanged } else { Seen::Create };
        let committed = prior.get(&entry.name).is_some_and(|p| p.same_object(entry));

        if !(on_disk && committed) {
            children.push(level.join(&entry.name)?);
        }
        step.push(Decision::new(entry.clone(), seen));
    }

    Ok((step, children))
}

fn classify_content(
    level: &CatalogPath,
    listing: &[CatalogEntry],
    prior: &BTreeMap<String, CatalogEntry>,
    level_dir: &Path,
) -> Step {
    let mut step = Step::empty(level.clone(), Pass::Content);

    for entry in listing.iter().filter(|e| !e.is_dir()) {
        let previous = prior.get(&entry.name);
        let on_disk = disk_kind(&level_dir.join(&entry.name));
        let stale_record = previous.is_some_and(|p| !p.same_object(entry));
        let wrong_type = on_disk.is_some_and(|kind| kind != entry.kind);

        if previous.is_some() && !stale_record && on_disk == Some(entry.kind) {
            step.push(Decision::new(entry.clone(), Seen::Unchanged));
            continue;
        }
        if stale_record || wrong_type {
            let old = previous.cloned().unwrap_or_else(|| entry.clone());
            step.push(Decision::new(old, Seen::Delete));
        }
        step.push(Decision::new(entry.clone(), Seen::Create));
    }

    let current: HashSet<&str> = listing.iter().map(|e| e.name.as_str()).collect();
    for (name, old) in prior {
        // Names that became directories were replaced by the structure pass
        if !current.contains(name.as_str()) {
            step.push(Decision::new(old.clone(), Seen::Delete));
        }
    }

    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use tempfile::TempDir;

    fn passes(walker: Walker<'_>) -> Vec<(String, Pass)> {
        walker
            .map(|step| {
                let step = step.unwrap();
                (step.level.to_string(), step.pass)
            })
            .collect()
    }

    #[test]
    fn levels_are_emitted_depth_first_with_deferred_finalize() {
        let temp = TempDir::new().unwrap();
        let catalog = MemoryCatalog::builder()
            .dir("a/b")
            .dir("c")
            .build()
            .unwrap();
        let checkpoints = CheckpointStore::new(&temp.path().join("state"));
        let walker = Walker::new(&catalog, &checkpoints, &temp.path().join("dest"));

        assert_eq!(
            passes(walker),
            vec![
                ("/".to_string(), Pass::Structure),
                ("/".to_string(), Pass::Content),
                ("/a".to_string(), Pass::Structure),
                ("/a".to_string(), Pass::Content),
                ("/a/b".to_string(), Pass::Structure),
                ("/a/b".to_string(), Pass::Content),
                ("/a/b".to_string(), Pass::Finalize),
                ("/a".to_string(), Pass::Finalize),
                ("/c".to_string(), Pass::Structure),
                ("/c".to_string(), Pass::Content),
                ("/c".to_string(), Pass::Finalize),
                ("/".to_string(), Pass::Finalize),
            ]
        );
    }

    #[test]
    fn unreadable_level_ends_the_walk() {
        let temp = TempDir::new().unwrap();
        let mut catalog = MemoryCatalog::builder().dir("a").dir("b").build().unwrap();
        catalog.make_unreadable(CatalogPath::parse("a").unwrap());
        let checkpoints = CheckpointStore::new(&temp.path().join("state"));
        let walker = Walker::new(&catalog, &checkpoints, &temp.path().join("dest"));

        let results: Vec<_> = walker.collect();

        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }

    #[test]
    fn prune_skips_subtree() {
        let temp = TempDir::new().unwrap();
        let catalog = MemoryCatalog::builder().dir("a/b").dir("c").build().unwrap();
        let checkpoints = CheckpointStore::new(&temp.path().join("state"));
        let mut walker = Walker::new(&catalog, &checkpoints, &temp.path().join("dest"));

        let structure = walker.next().unwrap().unwrap();
        assert_eq!(structure.dirs.len(), 2);
        walker.prune(&CatalogPath::parse("a").unwrap());

        let rest = passes(walker);
        assert!(rest.iter().all(|(level, _)| !level.starts_with("/a")));
        assert!(rest.contains(&("/c".to_string(), Pass::Finalize)));
    }
}
