//! Inspect command implementation.

use super::maintenance::format_size;
use super::{open, CommandResult, Format};
use serde::Serialize;
use std::path::Path;
use verso_core::{CommitId, DatabaseStats};

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Engine counters.
    pub stats: DatabaseStats,
    /// Branch heads.
    pub branches: Vec<(String, CommitId)>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CommandResult {
    let db = open(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        stats: db.stats()?,
        branches: db.list_branches()?,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let stats = &result.stats;
    println!("Verso Database Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    if let Some(bytes) = stats.log_bytes {
        println!("Log size: {}", format_size(bytes));
    }
    println!();
    println!("Engine:");
    println!("  Revision:          {}", stats.revision);
    println!("  Commits:           {}", stats.commits);
    println!("  Collections:       {}", stats.collections);
    println!("  Open transactions: {}", stats.open_transactions);
    println!("  Pruned below:      {}", stats.pruned_below);
    println!();
    println!("Branches ({}):", stats.branches);
    for (name, head) in &result.branches {
        println!("  {name:<24} {head}");
    }
}
