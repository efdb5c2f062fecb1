//! uncvmfs CLI
//!
//! `uncvmfs [-c] [-o] [-n THREADS] [-v...] <config_file> <repo_name>`
//!
//! Usage problems print the usage text and exit 0. Configuration and path
//! failures exit 1; a failing packaging tool passes its own status through.

mod cli;
mod commands;
mod error;
mod logging;

use std::process;

use clap::{CommandFactory, Parser};
use colored::Colorize;

use cli::{Cli, MAX_VERBOSITY};
use commands::SyncArgs;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) if cli.verbose <= MAX_VERBOSITY => cli,
        Ok(_) => {
            eprintln!("{}", Cli::command().render_usage());
            process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            process::exit(0);
        }
    };

    logging::init(cli.verbose);
    tracing::debug!(?cli, "arguments parsed");

    if let Err(e) = commands::run_sync(&SyncArgs::from(&cli)) {
        eprintln!("{}: {}", "error".red().bold(), e);
        process::exit(e.exit_code());
    }
}
