//! History command.

use super::{open, CommandResult, Format};
use std::path::Path;

/// Prints up to `limit` commits along `branch`, newest first.
pub fn log(path: &Path, branch: &str, limit: usize, format: Format) -> CommandResult {
    let db = open(path)?;
    let commits = db.log(branch, limit)?;

    match format {
        Format::Json => {
            let commits: Vec<_> = commits.iter().map(|c| c.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&commits)?);
        }
        Format::Text => {
            for commit in &commits {
                let parents: Vec<String> = commit.parents.iter().map(ToString::to_string).collect();
                println!(
                    "{} {:<12} parents=[{}] changes={} ts={}",
                    commit.id,
                    commit.branch,
                    parents.join(", "),
                    commit.changes.len(),
                    commit.timestamp_ms
                );
                for key in &commit.changes {
                    println!("    {key}");
                }
            }
        }
    }
    Ok(())
}
