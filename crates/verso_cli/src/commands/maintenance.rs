//! Garbage collection, commit pruning and log compaction.

use super::{open, CommandResult};
use std::path::Path;
use std::time::Duration;

/// Runs a collection pass, then optionally compacts the log.
pub fn gc(path: &Path, compact: bool) -> CommandResult {
    let db = open(path)?;
    let report = db.collect_garbage()?;

    println!("Garbage collection:");
    println!("  Floor:             {}", report.floor);
    println!("  Retained points:   {}", report.retained_points);
    println!("  Versions scanned:  {}", report.versions_scanned);
    println!("  Orphans reclaimed: {}", report.orphans_reclaimed);
    println!("  Superseded:        {}", report.superseded_reclaimed);

    if compact {
        if let Some(stats) = db.compact()? {
            println!();
            println!("Compaction:");
            println!("  Live versions: {}", stats.live_versions);
            println!("  Size before:   {}", format_size(stats.bytes_before));
            println!("  Size after:    {}", format_size(stats.bytes_after));
        }
    }
    Ok(())
}

/// Lists or removes dangling commits older than `expiry_secs`.
pub fn prune_commits(path: &Path, expiry_secs: u64, dry_run: bool) -> CommandResult {
    let db = open(path)?;
    let expiry = Duration::from_secs(expiry_secs);

    if dry_run {
        let dangling = db.find_dangling_commits(expiry)?;
        println!("{} dangling commit(s)", dangling.len());
        for id in dangling {
            println!("  {id}");
        }
        return Ok(());
    }

    let removed = db.prune_dangling_commits(expiry)?;
    println!("Pruned {removed} dangling commit(s)");
    Ok(())
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
