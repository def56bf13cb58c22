//! Report rendering for the docsync CLI

use anyhow::Result;
use console::style;
use docsync_sync::merge::MergeStatus;
use docsync_sync::{MergeReport, PullReport, StatusReport, SyncReport};
use docsync_types::SyncStats;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Print any report as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Summary of a push
pub fn print_push_report(report: &SyncReport) {
    println!();
    println!("{}", style("Push Statistics:").bold().underlined());
    print_common_stats(&report.stats);
    println!("  Blocks written: {}", style(report.stats.blocks_written).green());
    println!("  Duration: {}", style(format_duration(report.stats.duration)).blue());
    if report.dry_run {
        println!("  {}", style("Dry run, nothing was written").yellow());
    }
}

/// Summary of a pull
pub fn print_pull_report(report: &PullReport) {
    println!();
    println!("{}", style("Pull Statistics:").bold().underlined());
    if report.full_walk {
        println!("  Mode: {}", style("full remote walk").yellow());
    } else {
        println!(
            "  Changed: {} of {} checked",
            style(report.changed).green(),
            report.checked
        );
    }
    println!("  Discovered: {}", style(report.discovered).green());
    println!("  Staged: {}", style(report.stats.files_staged).green());
    print_errors(&report.stats);
    println!("  Duration: {}", style(format_duration(report.stats.duration)).blue());
}

/// One line per merged file followed by totals
pub fn print_merge_report(report: &MergeReport) {
    println!();
    println!("{}", style("Merge Results:").bold().underlined());
    for outcome in &report.outcomes {
        let label = format!("{:<8}", outcome.status);
        let label = match outcome.status {
            MergeStatus::Add | MergeStatus::Replace => style(label).green(),
            MergeStatus::Delete => style(label).yellow(),
            MergeStatus::Update => style(label).red().bold(),
            MergeStatus::Same => style(label).dim(),
        };
        println!("  {} {}", label, outcome.rel_path);
    }

    let conflicted: Vec<&str> = report.conflicted().collect();
    if conflicted.is_empty() {
        println!("{} Merged {} files", style("✓").green(), report.outcomes.len());
    } else {
        println!(
            "{} {} files have conflict markers; resolve them before the next push",
            style("⚠").yellow().bold(),
            conflicted.len()
        );
    }
}

/// Status of a working tree
pub fn print_status(folder: &Path, report: &StatusReport) {
    println!(
        "{} {}",
        style("⟲").blue().bold(),
        style(folder.display()).cyan().bold()
    );
    match &report.root_url {
        Some(url) => println!("  Remote root: {}", style(url).cyan()),
        None => println!("  Remote root: {}", style("not configured").red()),
    }
    println!(
        "  Indexed: {} files, {} directories",
        style(report.files).green(),
        style(report.dirs).green()
    );
    if report.unlinked > 0 {
        println!("  Unlinked entries: {}", style(report.unlinked).yellow());
    }
    match report.last_sync_at {
        Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync: {}", style("never").dim()),
    }

    if report.has_pending_merge() {
        let pulled = report
            .pulled_at
            .map(|at| at.format(" (pulled %Y-%m-%d %H:%M)").to_string())
            .unwrap_or_default();
        println!(
            "  Staged: {} files{}",
            style(report.staged.len()).yellow(),
            pulled
        );
        for rel in &report.staged {
            println!("    • {}", style(rel).dim());
        }
    }

    if report.conflicts.is_empty() {
        println!("  Conflicts: {}", style("none").green());
    } else {
        println!("  Conflicts: {}", style(report.conflicts.len()).red().bold());
        for conflict in &report.conflicts {
            println!(
                "    • {} ({} markers from line {})",
                conflict.rel_path, conflict.markers, conflict.first_line
            );
        }
    }
}

fn print_common_stats(stats: &SyncStats) {
    println!("  Created: {}", style(stats.nodes_created).green());
    println!("  Updated: {}", style(stats.nodes_updated).green());
    println!("  Unchanged: {}", style(stats.unchanged).dim());
    print_errors(stats);
}

fn print_errors(stats: &SyncStats) {
    println!(
        "  Errors: {}",
        if stats.errors > 0 {
            style(stats.errors).red()
        } else {
            style(stats.errors).green()
        }
    );
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
