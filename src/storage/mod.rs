//! Storage module for the pipeline ledger
//!
//! This module handles all relational persistence, including:
//! - SQLite database initialization and schema management
//! - Run tracking per stage (counts, status, config hash)
//! - The ProcessedSet of fully handled chunk files for resumable runs
//! - The loaded `cars` table of flattened rows

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteLedger;
pub use traits::{Ledger, StorageError, StorageResult};

use std::fmt;
use std::path::Path;

/// Opens (or creates) the ledger database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteLedger)` - Successfully initialized ledger
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_ledger(path: &Path) -> StorageResult<SqliteLedger> {
    SqliteLedger::new(path)
}

/// Pipeline stage a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Pages,
    Links,
    Details,
    Resume,
    Flatten,
    Load,
    EnqueuePages,
    Drain,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Pages,
        Stage::Links,
        Stage::Details,
        Stage::Resume,
        Stage::Flatten,
        Stage::Load,
        Stage::EnqueuePages,
        Stage::Drain,
    ];

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Links => "links",
            Self::Details => "details",
            Self::Resume => "resume",
            Self::Flatten => "flatten",
            Self::Load => "load",
            Self::EnqueuePages => "enqueue-pages",
            Self::Drain => "drain",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.to_db_string() == s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Aggregate unit counts recorded when a run finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl RunCounts {
    pub fn add(&mut self, other: RunCounts) {
        self.submitted += other.submitted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Represents a stage run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub stage: Stage,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// Status of a stage run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
