//! Command implementations

mod sync;

pub use sync::{SyncArgs, run_sync};
