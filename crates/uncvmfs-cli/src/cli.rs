//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Highest accepted number of `-v` flags
pub const MAX_VERBOSITY: u8 = 2;

/// uncvmfs - Incrementally mirror a content-addressed repository to local disk
#[derive(Parser, Debug)]
#[command(name = "uncvmfs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Update the catalog only, do not sync files
    #[arg(short = 'c')]
    pub catalog_only: bool,

    /// Offline: sync from the local catalog snapshot without updating it
    #[arg(short = 'o')]
    pub offline: bool,

    /// Number of download threads
    #[arg(short = 'n', value_name = "THREADS", value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// Increase log verbosity (up to twice)
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file
    pub config_file: PathBuf,

    /// Repository section to sync
    pub repo_name: String,
}

fn parse_threads(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("{} is not a positive integer", value)),
    }
}
