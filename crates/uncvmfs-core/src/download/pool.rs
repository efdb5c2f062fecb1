//! Bounded download pool
//!
//! A fixed number of worker threads take [`DownloadTask`]s from a bounded
//! queue, make sure the content is in the [`ContentStore`] and place it at
//! the task's target. Every task produces exactly one [`Completion`] on an
//! unbounded channel.
//!
//! A task is counted as outstanding from `submit` until its completion has
//! been sent, so once [`DownloadPool::wait_idle`] returns every result is
//! already waiting in the channel and a drain afterwards cannot miss one.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};
use uncvmfs_fs::{CatalogPath, ContentId, LinkMode, apply};

use super::{ContentStore, Fetcher};
use crate::error::DownloadError;

/// Worker count used when the caller does not choose one
pub const DEFAULT_WORKERS: usize = 8;

/// Queue slots per worker used when the caller does not choose a bound
pub const DEFAULT_QUEUE_PER_WORKER: usize = 4;

/// How often a blocked [`DownloadPool::wait_completed`] rechecks for idleness
const COMPLETION_POLL: Duration = Duration::from_millis(50);

/// One pending fetch-and-place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Catalog path of the file, used to attribute the result
    pub path: CatalogPath,
    /// Where the content is placed
    pub target: PathBuf,
    pub identity: ContentId,
}

/// Result of one task, reported exactly once
#[derive(Debug)]
pub struct Completion {
    pub task: DownloadTask,
    pub result: Result<LinkMode, DownloadError>,
}

/// Why a task was not accepted; the task is handed back
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The queue is at its bound; drain completions and resubmit
    #[error("download queue is full")]
    Full(DownloadTask),

    /// Another task for the same target is still in flight
    #[error("a download for {} is already in flight", .0.target.display())]
    Busy(DownloadTask),

    #[error("download pool is shut down")]
    Closed(DownloadTask),
}

impl SubmitError {
    pub fn into_task(self) -> DownloadTask {
        match self {
            Self::Full(task) | Self::Busy(task) | Self::Closed(task) => task,
        }
    }
}

/// Sizing of a [`DownloadPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub workers: usize,
    pub queue_bound: usize,
}

impl PoolOptions {
    /// `workers` threads with the default queue bound. Zero is raised to one.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_bound: workers * DEFAULT_QUEUE_PER_WORKER,
        }
    }

    pub fn with_queue_bound(mut self, bound: usize) -> Self {
        self.queue_bound = bound.max(1);
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

#[derive(Debug, Default)]
struct Outstanding {
    count: usize,
    targets: HashSet<PathBuf>,
}

#[derive(Debug, Default)]
struct Shared {
    outstanding: Mutex<Outstanding>,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Outstanding> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self, target: &Path) -> bool {
        let mut outstanding = self.lock();
        if !outstanding.targets.insert(target.to_path_buf()) {
            return false;
        }
        outstanding.count += 1;
        true
    }

    fn release(&self, target: &Path) {
        let mut outstanding = self.lock();
        outstanding.targets.remove(target);
        outstanding.count -= 1;
        if outstanding.count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed-size pool of download workers
pub struct DownloadPool {
    sender: Option<Sender<DownloadTask>>,
    completions: Receiver<Completion>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl DownloadPool {
    /// Start `options.workers` threads sharing `store` and `fetcher`.
    pub fn new(options: PoolOptions, store: ContentStore, fetcher: Arc<dyn Fetcher>) -> Self {
        let (sender, tasks) = crossbeam_channel::bounded::<DownloadTask>(options.queue_bound);
        let (done, completions) = crossbeam_channel::unbounded::<Completion>();
        let shared = Arc::new(Shared::default());

        let workers = (0..options.workers)
            .map(|index| {
                let tasks = tasks.clone();
                let done = done.clone();
                let shared = Arc::clone(&shared);
                let store = store.clone();
                let fetcher = Arc::clone(&fetcher);
                thread::Builder::new()
                    .name(format!("download-{}", index))
                    .spawn(move || worker_loop(&tasks, &done, &shared, &store, fetcher.as_ref()))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "could not start download worker");
                    None
                }
            })
            .collect();

        Self {
            sender: Some(sender),
            completions,
            shared,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue `task` without blocking.
    ///
    /// # Errors
    ///
    /// Hands the task back when the queue is at its bound, when its target is
    /// already in flight, or after shutdown.
    pub fn submit(&self, task: DownloadTask) -> Result<(), SubmitError> {
        let Some(sender) = &self.sender else {
            return Err(SubmitError::Closed(task));
        };
        if !self.shared.reserve(&task.target) {
            return Err(SubmitError::Busy(task));
        }

        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                self.shared.release(&task.target);
                Err(SubmitError::Full(task))
            }
            Err(TrySendError::Disconnected(task)) => {
                self.shared.release(&task.target);
                Err(SubmitError::Closed(task))
            }
        }
    }

    /// Next finished task, if one is ready. Never blocks.
    pub fn poll_completed(&self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Next finished task, blocking while any task is still outstanding.
    ///
    /// Returns `None` once nothing is outstanding and nothing is left to
    /// drain.
    pub fn wait_completed(&self) -> Option<Completion> {
        loop {
            match self.completions.recv_timeout(COMPLETION_POLL) {
                Ok(completion) => return Some(completion),
                Err(RecvTimeoutError::Disconnected) => return None,
                // A worker releases its slot only after sending, so recheck
                Err(RecvTimeoutError::Timeout) if self.outstanding() == 0 => {
                    return self.completions.try_recv().ok();
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Number of tasks submitted but not yet reported
    pub fn outstanding(&self) -> usize {
        self.shared.lock().count
    }

    /// Block until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut outstanding = self.shared.lock();
        while outstanding.count > 0 {
            outstanding = self
                .shared
                .idle
                .wait(outstanding)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting work and join the workers once the queue is empty.
    ///
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("download worker panicked");
            }
        }
    }
}

impl Drop for DownloadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    tasks: &Receiver<DownloadTask>,
    done: &Sender<Completion>,
    shared: &Shared,
    store: &ContentStore,
    fetcher: &dyn Fetcher,
) {
    while let Ok(task) = tasks.recv() {
        // A panic inside a fetcher must still produce a completion and a release
        let result = panic::catch_unwind(AssertUnwindSafe(|| run_task(&task, store, fetcher)))
            .unwrap_or_else(|_| {
                warn!(path = %task.path, "download worker panicked");
                Err(DownloadError::Panicked { id: task.identity })
            });
        let target = task.target.clone();
        // Completion first, then release, so wait_idle implies drainable
        let _ = done.send(Completion { task, result });
        shared.release(&target);
    }
}

fn run_task(
    task: &DownloadTask,
    store: &ContentStore,
    fetcher: &dyn Fetcher,
) -> Result<LinkMode, DownloadError> {
    let source = store.ensure(&task.identity, fetcher)?;
    let mode = apply::place_file(&source, &task.target)?;
    debug!(path = %task.path, identity = %task.identity, ?mode, "file placed");
    Ok(mode)
}
