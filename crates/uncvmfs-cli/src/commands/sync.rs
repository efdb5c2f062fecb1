//! The mirror run: update the catalog, sync the tree, package it

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use tracing::info;
use uncvmfs_core::{
    HttpFetcher, ManifestCatalog, RepoConfig, SyncEngine, SyncReport, package, update,
};

use crate::cli::Cli;
use crate::error::{CliError, Result};

/// What one invocation was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncArgs {
    pub config_file: PathBuf,
    pub repo_name: String,
    pub threads: Option<usize>,
    pub catalog_only: bool,
    pub offline: bool,
}

impl From<&Cli> for SyncArgs {
    fn from(cli: &Cli) -> Self {
        Self {
            config_file: cli.config_file.clone(),
            repo_name: cli.repo_name.clone(),
            threads: cli.threads,
            catalog_only: cli.catalog_only,
            offline: cli.offline,
        }
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| uncvmfs_fs::Error::io(path, e))?;
    Ok(())
}

/// Run the whole mirror pipeline for one repository.
pub fn run_sync(args: &SyncArgs) -> Result<()> {
    let mut config = RepoConfig::load(&args.config_file, &args.repo_name)?;
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    for dir in [&config.dest, &config.state, &config.store] {
        create_dir(dir)?;
    }

    let catalog = if args.offline {
        info!(snapshot = %config.snapshot_path().display(), "offline, using local catalog");
        None
    } else {
        Some(update::update_catalog(&config)?)
    };
    if args.catalog_only {
        println!(
            "{} Catalog of {} is up to date",
            "OK".green().bold(),
            config.name
        );
        return Ok(());
    }
    let catalog = match catalog {
        Some(catalog) => catalog,
        None => ManifestCatalog::load(&config.snapshot_path())?,
    };

    let fetcher = Arc::new(HttpFetcher::new(&config.url)?);
    let report = SyncEngine::from_config(&config, fetcher)?.run(&catalog)?;
    print_report(&config, &report);

    if !report.success() {
        return Err(CliError::Incomplete {
            failed: report.errors.len(),
        });
    }

    if let Some(image) = &config.image {
        package::build_image(&config, image)?;
        println!("{} Packaged {}", "OK".green().bold(), image.display());
    }
    Ok(())
}

fn print_report(config: &RepoConfig, report: &SyncReport) {
    let status = if report.success() {
        "OK".green().bold()
    } else {
        "INCOMPLETE".yellow().bold()
    };
    println!(
        "{} {} -> {}: {} dirs, {} links, {} files placed, {} deleted, {} unchanged",
        status,
        config.name,
        config.dest.display(),
        report.dirs_created,
        report.links_created,
        report.files_placed,
        report.deleted,
        report.unchanged
    );
    for error in &report.errors {
        println!("   {} {}", "-".red(), error);
    }
}
