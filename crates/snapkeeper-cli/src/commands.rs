use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "snapkeeper")]
#[command(about = "Deduplicating media backup: scan, hash, plan, copy", long_about = None)]
pub struct Cli {
    /// Project folder (holds Project.db and Logs/)
    #[arg(short, long, default_value = ".")]
    pub project: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new project in the project folder
    Init {
        /// Project display name
        name: String,
        /// Content hash: SHA1, SHA256, SHA3-256 or SizeName (preview only)
        #[arg(long, default_value = "SHA256")]
        hash: String,
        /// CPU profile: Eco, Balanced, Fast or Max
        #[arg(long, default_value = "Balanced")]
        profile: String,
        /// Destination root for the backup copy
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Register a source directory to scan
    AddRoot {
        path: PathBuf,
        #[arg(long)]
        label: Option<String>,
    },
    /// List registered scan roots
    Roots,
    /// Set or change the destination root
    SetTarget { path: PathBuf },
    /// Enumerate all enabled roots into the store
    Scan,
    /// Hash everything discovered and not yet hashed
    Hash,
    /// Group duplicates and propose the destination folder tree
    Plan,
    /// Scan, hash and plan in one sweep
    Run,
    /// Show the proposed folder tree with rollups
    Tree,
    /// List unique files, widest duplication first
    Dupes {
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 25)]
        limit: i64,
        /// Also list every instance of each unique file
        #[arg(long)]
        instances: bool,
    },
    /// Execute the plan: copy one instance of each unique file
    Copy,
    /// Re-hash copied files against their sources
    Verify,
    /// Show pipeline state and per-status counts
    Status,
    /// List jobs that failed during the last copy
    FailedJobs,
    /// Acknowledge a fault and return the pipeline to Idle
    Reset,
}
