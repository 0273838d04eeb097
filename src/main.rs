//! `dep-checkr`: audit the dependency closure of every .NET assembly in a directory.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]).
//! 2. Load config ([`config::load_config`]) and apply CLI overrides.
//! 3. List top-level modules ([`scan::discover_modules`]).
//! 4. Walk each module's declared dependencies ([`scan::scan`], [`resolver`]),
//!    collecting issues and redirects ([`tracker`]).
//! 5. Render the requested report ([`report`]).
//! 6. Exit with the number of distinct issues (`0` is a clean scan).

mod cli;
mod config;
mod loader;
mod models;
mod report;
mod resolver;
mod scan;
mod tracker;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, ReportFormat};
use config::load_config;
use loader::FileSystemLoader;
use scan::{discover_modules, scan, ScanOptions};

/// Log level: `--debug` forces `dep_checkr=debug`, otherwise `RUST_LOG`, otherwise warnings.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("dep_checkr=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dep_checkr=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if !cli.path.is_dir() {
        eprintln!("Path not valid. Please verify that the path is a directory and it exists.");
        std::process::exit(1);
    }
    let path = cli
        .path
        .canonicalize()
        .unwrap_or_else(|_| cli.path.clone());

    let mut config = load_config(&path, cli.config.as_deref())?;
    if cli.no_ambient {
        config.ambient.enabled = false;
    }
    config.ambient.probe_paths.extend(cli.ambient_path.iter().cloned());

    let options = ScanOptions {
        extensions: config.scan.extensions.clone(),
        exclude: config.exclude_patterns()?,
        show_progress: !cli.quiet && matches!(cli.report, ReportFormat::Terminal),
    };

    let files = discover_modules(&path, &options)?;
    if files.is_empty() {
        println!("No files to inspect.");
        return Ok(());
    }

    let probe = config.ambient_probe();
    tracing::debug!("ambient probe directories: {:?}", probe.dirs());
    let loader = FileSystemLoader::new(probe);

    let outcome = scan(&path, &files, &loader, &options)?;

    match cli.report {
        ReportFormat::Terminal => {
            report::terminal::render(&outcome, &path, cli.verbose, cli.quiet)?;
        }
        ReportFormat::Json => {
            report::json::render(&outcome, &path)?;
        }
    }

    // Exit code: number of distinct issue keys; clamped so it never wraps to 0.
    let issues = outcome.tracker.issue_count();
    if issues > 0 {
        std::process::exit(issues.min(255) as i32);
    }

    Ok(())
}
