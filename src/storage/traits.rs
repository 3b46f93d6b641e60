//! Ledger trait and error types
//!
//! This module defines the trait interface for ledger backends and
//! associated error types.

use crate::pipeline::FlatRecord;
use crate::storage::{RunCounts, RunRecord, RunStatus, Stage};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for ledger operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for ledger backend implementations
///
/// This trait defines all relational operations needed by the pipeline.
pub trait Ledger {
    // ===== Run Management =====

    /// Starts a new run of `stage`
    ///
    /// Runs of the same stage still marked running (left behind by a crash) are marked
    /// interrupted first.
    ///
    /// # Arguments
    ///
    /// * `stage` - The stage being run
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn begin_run(&mut self, stage: Stage, config_hash: &str) -> StorageResult<i64>;

    /// Records the final status and counts of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: RunCounts)
        -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run of a stage
    fn latest_run(&self, stage: Stage) -> StorageResult<Option<RunRecord>>;

    /// Gets the most recent runs across all stages, newest first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    /// Marks running runs of `stage` as interrupted, returning how many changed
    fn interrupt_stale_runs(&mut self, stage: Stage) -> StorageResult<usize>;

    // ===== ProcessedSet =====

    /// Keys of every chunk file marked fully processed
    fn processed_chunks(&self) -> StorageResult<BTreeSet<String>>;

    /// Marks one chunk file as fully processed by `run_id`
    fn mark_chunk_processed(&mut self, chunk_key: &str, run_id: i64) -> StorageResult<()>;

    /// Forgets every processed chunk, returning how many were removed
    fn clear_processed_chunks(&mut self) -> StorageResult<usize>;

    // ===== Loaded rows =====

    /// Replaces the whole `cars` table with `rows` in one transaction
    fn replace_cars(&mut self, rows: &[FlatRecord]) -> StorageResult<usize>;

    fn count_cars(&self) -> StorageResult<u64>;
}
