//! Catalog-to-disk synchronization
//!
//! [`Walker`] classifies what each level needs; [`SyncEngine`] applies it
//! and commits checkpoints.

mod driver;
mod walker;

pub use driver::{SyncEngine, SyncReport};
pub use walker::{Decision, Pass, Seen, Step, Walker};
