//! Content-addressed downloads
//!
//! File content is fetched by identity into a shared local content store and
//! then linked into the destination tree by a fixed-size pool of worker
//! threads.

mod fetch;
mod pool;
mod store;

pub use fetch::{Fetcher, HttpFetcher, MemoryFetcher};
pub use pool::{
    Completion, DEFAULT_QUEUE_PER_WORKER, DEFAULT_WORKERS, DownloadPool, DownloadTask, PoolOptions,
    SubmitError,
};
pub use store::ContentStore;
