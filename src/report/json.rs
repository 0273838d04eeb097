use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::models::ModuleSummary;
use crate::scan::{ScanOutcome, SkippedModule};
use crate::tracker::Discrepancy;

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub path: String,
    pub modules: &'a [ModuleSummary],
    pub redirects: Vec<Discrepancy<'a>>,
    pub issues: Vec<Discrepancy<'a>>,
    pub skipped: &'a [SkippedModule],
    pub issue_count: usize,
}

impl<'a> JsonReport<'a> {
    pub fn new(outcome: &'a ScanOutcome, path: &Path) -> Self {
        JsonReport {
            path: path.display().to_string(),
            modules: &outcome.tree,
            redirects: outcome.tracker.redirect_entries(),
            issues: outcome.tracker.issue_entries(),
            skipped: &outcome.skipped,
            issue_count: outcome.tracker.issue_count(),
        }
    }
}

/// Print the scan as pretty JSON on stdout.
pub fn render(outcome: &ScanOutcome, path: &Path) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&JsonReport::new(outcome, path))?);
    Ok(())
}
