use std::path::{Path, PathBuf};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::loader::{LoadOutcome, ModuleLoader};
use crate::models::{ModuleSummary, ResolutionTree};
use crate::resolver::DependencyResolver;
use crate::tracker::DiscrepancyTracker;

/// A top-level file that could not be loaded and was left out of the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedModule {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a scan produces, read-only once [`scan`] returns.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub tree: ResolutionTree,
    pub tracker: DiscrepancyTracker,
    pub skipped: Vec<SkippedModule>,
}

pub struct ScanOptions {
    pub extensions: Vec<String>,
    pub exclude: Vec<Regex>,
    pub show_progress: bool,
}

/// List candidate module files directly under `dir`, sorted by file name.
pub fn discover_modules(dir: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let matches_ext = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| {
                options
                    .extensions
                    .iter()
                    .any(|want| want.eq_ignore_ascii_case(ext))
            });
        if !matches_ext || options.exclude.iter().any(|re| re.is_match(file_name)) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Load each top-level file and walk its dependencies against `dir`.
///
/// A file that fails to load is recorded in [`ScanOutcome::skipped`]; the scan
/// carries on with the next one.
pub fn scan<L: ModuleLoader + ?Sized>(
    dir: &Path,
    files: &[PathBuf],
    loader: &L,
    options: &ScanOptions,
) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    let mut resolver = DependencyResolver::new(loader, options.extensions.clone());

    let pb = if options.show_progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    for file in files {
        if let Some(pb) = &pb {
            let name = file.file_name().map(|n| n.to_string_lossy().into_owned());
            pb.set_message(name.unwrap_or_default());
        }

        match resolver.load(file) {
            LoadOutcome::Loaded(descriptor) => {
                let mut root = ModuleSummary::root(descriptor.identity.clone());
                resolver.resolve_module(file, &descriptor, dir, &mut root, &mut outcome.tracker);
                outcome.tree.push(root);
            }
            LoadOutcome::LoadError(reason) => {
                warn!("Encountered issue with file {}: {}", file.display(), reason);
                outcome.skipped.push(SkippedModule {
                    path: file.clone(),
                    reason,
                });
            }
            LoadOutcome::NotFound => {
                outcome.skipped.push(SkippedModule {
                    path: file.clone(),
                    reason: "file disappeared during scan".to_string(),
                });
            }
        }

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    Ok(outcome)
}
