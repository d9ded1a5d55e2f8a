//! Document commands. Each runs in its own transaction.

use super::{open, CommandResult, Format};
use std::error::Error;
use std::path::Path;
use verso_core::{CommitId, Database, Document, Transaction};

/// Starts a read on the head of `branch`, or read-only on commit `at`.
fn begin_read(db: &Database, branch: &str, at: Option<u64>) -> Result<Transaction, Box<dyn Error>> {
    Ok(match at {
        Some(commit) => db.begin_at(CommitId::new(commit))?,
        None => db.begin_transaction(branch)?,
    })
}

/// Prints a document as seen from the head of `branch` or from commit `at`.
pub fn get(path: &Path, branch: &str, at: Option<u64>, collection: &str, id: &str) -> CommandResult {
    let db = open(path)?;
    let mut txn = begin_read(&db, branch, at)?;
    match db.get(&mut txn, collection, id)? {
        Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
        None => return Err(format!("{collection}/{id} not found at {}", txn.snapshot()).into()),
    }
    Ok(())
}

/// Writes a JSON document and commits.
pub fn put(path: &Path, branch: &str, collection: &str, id: &str, json: &str) -> CommandResult {
    let document: Document = serde_json::from_str(json)?;
    let db = open(path)?;
    db.transaction(branch, |txn| txn.put(collection, id, document))?;
    println!("Committed {} on {branch}", db.current_head(branch)?);
    Ok(())
}

/// Removes a document and commits.
pub fn remove(path: &Path, branch: &str, collection: &str, id: &str) -> CommandResult {
    let db = open(path)?;
    db.transaction(branch, |txn| txn.remove(collection, id))?;
    println!("Committed {} on {branch}", db.current_head(branch)?);
    Ok(())
}

/// Lists documents having every top-level field of `example`, cut down to
/// `fields` when any are given.
pub fn find(
    path: &Path,
    branch: &str,
    at: Option<u64>,
    collection: &str,
    example: &str,
    fields: &[String],
    format: Format,
) -> CommandResult {
    let example: Document = serde_json::from_str(example)?;
    let db = open(path)?;
    let mut txn = begin_read(&db, branch, at)?;
    let hits = if fields.is_empty() {
        db.find(&mut txn, collection, &example)?
    } else {
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        db.find_fields(&mut txn, collection, &example, &fields)?
    };

    match format {
        Format::Json => {
            let map: serde_json::Map<String, Document> = hits
                .into_iter()
                .map(|(id, document)| (id.as_str().to_string(), document))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        Format::Text => {
            for (id, document) in &hits {
                println!("{id}: {document}");
            }
            println!("({} documents)", hits.len());
        }
    }
    Ok(())
}
