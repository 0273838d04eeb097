use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use crate::models::ModuleSummary;
use crate::scan::ScanOutcome;
use crate::tracker::Discrepancy;

/// Render a colored terminal report.
pub fn render(outcome: &ScanOutcome, path: &Path, verbose: bool, quiet: bool) -> Result<()> {
    let tracker = &outcome.tracker;

    if quiet {
        println!(
            "Modules: {}  Issues: {}  Redirects: {}  Skipped: {}",
            outcome.tree.len(),
            tracker.issue_count().to_string().red(),
            tracker.redirect_count().to_string().yellow(),
            outcome.skipped.len(),
        );
        return Ok(());
    }

    println!(
        "\n {} v{}",
        "dep-checkr".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Scanning: {}\n", path.display());

    for line in tree_lines(&outcome.tree, verbose) {
        println!("{}", line);
    }
    println!();

    if !outcome.skipped.is_empty() {
        println!(" {} Files that could not be inspected:\n", "[SKIP]".magenta().bold());
        for skipped in &outcome.skipped {
            println!("   {}: {}", skipped.path.display(), skipped.reason);
        }
        println!();
    }

    if tracker.redirect_count() > 0 {
        println!(" {} Loaded via redirect:\n", "[REDIRECT]".yellow().bold());
        println!("{}", discrepancy_table(&tracker.redirect_entries(), "Expected by", Color::Yellow));
        println!();
    }

    if tracker.issue_count() > 0 {
        println!(" {} Could not locate:\n", "[ISSUE]".red().bold());
        println!("{}", discrepancy_table(&tracker.issue_entries(), "Expected by", Color::Red));
        println!();
    }

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(
        " │  {:<48} │",
        format!("Modules scanned    : {}", outcome.tree.len())
    );
    println!(
        " │  {:<48} │",
        format!("{}  Issues          : {:>4}", "✗".red(), tracker.issue_count())
    );
    println!(
        " │  {:<48} │",
        format!("{}  Redirects       : {:>4}", "⚠".yellow(), tracker.redirect_count())
    );
    println!(
        " │  {:<48} │",
        format!("-  Skipped         : {:>4}", outcome.skipped.len())
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    Ok(())
}

/// Indented tree, four spaces per level. Without `verbose`, roots whose subtree is
/// fully local and resolved are collapsed to their own line.
pub fn tree_lines(tree: &[ModuleSummary], verbose: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for root in tree {
        if verbose || root.has_unresolved() || root.has_ambient() {
            push_lines(root, 0, &mut lines);
        } else {
            lines.push(root.to_string().green().to_string());
        }
    }
    lines
}

fn push_lines(summary: &ModuleSummary, depth: usize, lines: &mut Vec<String>) {
    let text = format!("{}{}", " ".repeat(depth * 4), summary);
    let colored = if !summary.resolved {
        text.red()
    } else if summary.cyclic {
        text.cyan()
    } else {
        text.green()
    };
    lines.push(colored.to_string());
    for child in &summary.children {
        push_lines(child, depth + 1, lines);
    }
}

fn discrepancy_table(entries: &[Discrepancy<'_>], referrer_header: &str, color: Color) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Module").add_attribute(Attribute::Bold),
            Cell::new("Version").add_attribute(Attribute::Bold),
            Cell::new(referrer_header).add_attribute(Attribute::Bold),
        ]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.name).fg(color),
            Cell::new(&entry.version),
            Cell::new(entry.referrers.join("\n")),
        ]);
    }

    table
}
