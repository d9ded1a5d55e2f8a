//! Branch commands: list, create, delete, merge.

use super::{open, CommandResult, Format};
use serde::Serialize;
use std::path::Path;
use verso_core::{CommitId, MergeOutcome};

#[derive(Debug, Serialize)]
struct BranchEntry {
    name: String,
    head: CommitId,
}

/// Lists branches and their heads.
pub fn list(path: &Path, format: Format) -> CommandResult {
    let db = open(path)?;
    let branches: Vec<BranchEntry> = db
        .list_branches()?
        .into_iter()
        .map(|(name, head)| BranchEntry { name, head })
        .collect();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&branches)?),
        Format::Text => {
            for branch in &branches {
                println!("{:<24} {}", branch.name, branch.head);
            }
        }
    }
    Ok(())
}

/// Creates `name` at `from`, or at the head of `from_branch`.
pub fn create(path: &Path, name: &str, from: Option<u64>, from_branch: &str) -> CommandResult {
    let db = open(path)?;
    let commit = match from {
        Some(id) => CommitId::new(id),
        None => db.current_head(from_branch)?,
    };
    db.create_branch(name, commit)?;
    println!("Created branch {name} at {commit}");
    Ok(())
}

/// Deletes a branch.
pub fn delete(path: &Path, name: &str) -> CommandResult {
    let db = open(path)?;
    db.delete_branch(name)?;
    println!("Deleted branch {name}");
    Ok(())
}

/// Merges `source` into `target`.
pub fn merge(path: &Path, target: &str, source: &str) -> CommandResult {
    let db = open(path)?;
    match db.merge(target, source)? {
        MergeOutcome::UpToDate(head) => println!("{target} is already up to date at {head}"),
        MergeOutcome::FastForward(head) => println!("Fast-forwarded {target} to {head}"),
        MergeOutcome::Merged(commit) => println!("Merged {source} into {target} as {commit}"),
    }
    Ok(())
}
