//! CLI command implementations.

pub mod branches;
pub mod documents;
pub mod history;
pub mod inspect;
pub mod maintenance;

use std::error::Error;
use std::path::Path;
use verso_core::{Config, Database};

/// Result type shared by every command.
pub type CommandResult = Result<(), Box<dyn Error>>;

/// Opens an existing database; commands never create one implicitly.
pub fn open(path: &Path) -> Result<Database, Box<dyn Error>> {
    Ok(Database::open_with_config(
        path,
        Config::default().create_if_missing(false),
    )?)
}

/// Creates a database at `path`, failing if one exists.
pub fn init(path: &Path) -> CommandResult {
    let db = Database::open_with_config(path, Config::default().error_if_exists(true))?;
    let branches = db.list_branches()?;
    println!("Created database at {}", path.display());
    for (name, head) in branches {
        println!("  {name} -> {head}");
    }
    Ok(())
}

/// Output format for commands that can emit JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn commands_round_trip_through_a_database() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cli_db");

        assert!(open(&path).is_err());
        init(&path).unwrap();
        assert!(init(&path).is_err());

        documents::put(&path, "main", "users", "ada", r#"{"name":"Ada"}"#).unwrap();
        branches::create(&path, "dev", None, "main").unwrap();
        documents::remove(&path, "dev", "users", "ada").unwrap();
        maintenance::gc(&path, true).unwrap();
        maintenance::prune_commits(&path, 0, true).unwrap();
        inspect::run(&path, Format::Json).unwrap();
        history::log(&path, "dev", 10, Format::Text).unwrap();

        let db = open(&path).unwrap();
        let mut main = db.begin_transaction("main").unwrap();
        assert_eq!(db.get(&mut main, "users", "ada").unwrap(), Some(json!({ "name": "Ada" })));
        let mut dev = db.begin_transaction("dev").unwrap();
        assert_eq!(db.get(&mut dev, "users", "ada").unwrap(), None);
    }

    #[test]
    fn put_rejects_invalid_json() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cli_db");
        init(&path).unwrap();
        assert!(documents::put(&path, "main", "users", "ada", "{not json").is_err());
    }

    #[test]
    fn reads_at_an_older_commit() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cli_db");
        init(&path).unwrap();
        documents::put(&path, "main", "users", "ada", r#"{"name":"Ada","age":36}"#).unwrap();
        documents::remove(&path, "main", "users", "ada").unwrap();

        assert!(documents::get(&path, "main", None, "users", "ada").is_err());
        documents::get(&path, "main", Some(1), "users", "ada").unwrap();
        let fields = vec!["name".to_string()];
        documents::find(&path, "main", Some(1), "users", "{}", &fields, Format::Json).unwrap();
        assert!(documents::get(&path, "main", Some(99), "users", "ada").is_err());
    }
}
