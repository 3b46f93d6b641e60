//! Statistics generation from the run ledger
//!
//! This module provides functionality for extracting and displaying
//! pipeline statistics from the ledger.

use super::format_success_rate;
use crate::storage::{Ledger, RunRecord, Stage};
use crate::EtlError;

/// How many recent runs are listed
const RECENT_RUNS: usize = 10;

/// Ledger statistics summary
#[derive(Debug, Clone)]
pub struct LedgerStatistics {
    /// Latest run of every stage that has run at least once, in stage order
    pub latest_by_stage: Vec<RunRecord>,

    /// Most recent runs across all stages, newest first
    pub recent_runs: Vec<RunRecord>,

    /// Chunk files in the ProcessedSet
    pub processed_chunks: usize,

    /// Rows in the `cars` table
    pub car_rows: u64,
}

/// Loads statistics from the ledger
///
/// # Arguments
///
/// * `ledger` - The ledger to query
pub fn load_statistics(ledger: &dyn Ledger) -> Result<LedgerStatistics, EtlError> {
    let mut latest_by_stage = Vec::new();
    for stage in Stage::ALL {
        if let Some(run) = ledger.latest_run(stage)? {
            latest_by_stage.push(run);
        }
    }

    Ok(LedgerStatistics {
        latest_by_stage,
        recent_runs: ledger.recent_runs(RECENT_RUNS)?,
        processed_chunks: ledger.processed_chunks()?.len(),
        car_rows: ledger.count_cars()?,
    })
}

fn run_line(run: &RunRecord) -> String {
    format!(
        "#{} {} [{}] started {} | {} submitted, {} succeeded, {} failed ({})",
        run.id,
        run.stage,
        run.status.to_db_string(),
        run.started_at,
        run.counts.submitted,
        run.counts.succeeded,
        run.counts.failed,
        format_success_rate(run.counts.succeeded, run.counts.failed)
    )
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &LedgerStatistics) {
    println!("=== Pipeline Statistics ===\n");

    println!("Overview:");
    println!("  Processed chunk files: {}", stats.processed_chunks);
    println!("  Loaded car rows: {}", stats.car_rows);
    println!();

    if stats.latest_by_stage.is_empty() {
        println!("No runs recorded yet");
        return;
    }

    println!("Latest Run per Stage:");
    for run in &stats.latest_by_stage {
        println!("  {}", run_line(run));
    }
    println!();

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!("  {}", run_line(run));
    }
}
