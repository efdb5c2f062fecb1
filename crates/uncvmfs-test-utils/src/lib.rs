//! Shared test utilities for the uncvmfs workspace.
//!
//! This crate provides standardised fixtures so the crate test suites do not
//! each build their own scratch layouts. It is a dev-dependency only.
//!
//! # Modules
//!
//! - [`tree`]: [`TestTree`] with destination, store and state directories

pub mod tree;

pub use tree::TestTree;
