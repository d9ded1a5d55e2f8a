//! Verso CLI
//!
//! Command-line tools for Verso databases.
//!
//! # Commands
//!
//! - `init` - Create a database
//! - `branches`, `create-branch`, `delete-branch`, `merge` - Manage branches
//! - `get`, `put`, `remove`, `find` - Read and write documents
//! - `log` - Show a branch's history
//! - `gc`, `prune-commits` - Reclaim space
//! - `inspect` - Display database statistics

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Verso command-line database tools.
#[derive(Parser)]
#[command(name = "verso")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty database
    Init,

    /// List branches and their heads
    Branches {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Create a branch
    CreateBranch {
        /// New branch name
        name: String,

        /// Commit number to branch from
        #[arg(long, conflicts_with = "from_branch")]
        from: Option<u64>,

        /// Branch whose head to branch from
        #[arg(long, default_value = "main")]
        from_branch: String,
    },

    /// Delete a branch
    DeleteBranch {
        /// Branch name
        name: String,
    },

    /// Show commits along a branch, newest first
    Log {
        /// Branch name
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Maximum number of commits
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print a document
    Get {
        /// Collection name
        collection: String,

        /// Document id
        id: String,

        /// Branch to read from
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Read from this commit number instead of the branch head
        #[arg(long)]
        at: Option<u64>,
    },

    /// Write a JSON document
    Put {
        /// Collection name
        collection: String,

        /// Document id
        id: String,

        /// Document as JSON
        json: String,

        /// Branch to commit on
        #[arg(short, long, default_value = "main")]
        branch: String,
    },

    /// Remove a document
    Remove {
        /// Collection name
        collection: String,

        /// Document id
        id: String,

        /// Branch to commit on
        #[arg(short, long, default_value = "main")]
        branch: String,
    },

    /// Find documents matching a JSON example
    Find {
        /// Collection name
        collection: String,

        /// Example object; every field must match
        #[arg(default_value = "{}")]
        example: String,

        /// Branch to read from
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Read from this commit number instead of the branch head
        #[arg(long)]
        at: Option<u64>,

        /// Only print these fields of each document
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Merge one branch into another
    Merge {
        /// Branch receiving the changes
        target: String,

        /// Branch providing the changes
        source: String,
    },

    /// Reclaim versions no branch or transaction can see
    Gc {
        /// Rewrite the store log afterwards
        #[arg(short, long)]
        compact: bool,
    },

    /// Remove commits no branch reaches
    PruneCommits {
        /// Only prune commits older than this many seconds
        #[arg(short, long, default_value = "86400")]
        expiry: u64,

        /// Dry run - list what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Display database statistics and branches
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.path.ok_or("Database path required (--path)")?;
    debug!(path = %path.display(), "running command");

    match cli.command {
        Commands::Init => commands::init(&path)?,
        Commands::Branches { format } => commands::branches::list(&path, format)?,
        Commands::CreateBranch {
            name,
            from,
            from_branch,
        } => commands::branches::create(&path, &name, from, &from_branch)?,
        Commands::DeleteBranch { name } => commands::branches::delete(&path, &name)?,
        Commands::Log {
            branch,
            limit,
            format,
        } => commands::history::log(&path, &branch, limit, format)?,
        Commands::Get {
            collection,
            id,
            branch,
            at,
        } => commands::documents::get(&path, &branch, at, &collection, &id)?,
        Commands::Put {
            collection,
            id,
            json,
            branch,
        } => commands::documents::put(&path, &branch, &collection, &id, &json)?,
        Commands::Remove {
            collection,
            id,
            branch,
        } => commands::documents::remove(&path, &branch, &collection, &id)?,
        Commands::Find {
            collection,
            example,
            branch,
            at,
            fields,
            format,
        } => commands::documents::find(&path, &branch, at, &collection, &example, &fields, format)?,
        Commands::Merge { target, source } => commands::branches::merge(&path, &target, &source)?,
        Commands::Gc { compact } => commands::maintenance::gc(&path, compact)?,
        Commands::PruneCommits { expiry, dry_run } => {
            commands::maintenance::prune_commits(&path, expiry, dry_run)?;
        }
        Commands::Inspect { format } => commands::inspect::run(&path, format)?,
    }

    Ok(())
}
