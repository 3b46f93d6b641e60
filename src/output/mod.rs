//! Output module for stage summaries and ledger statistics
//!
//! This module handles:
//! - Success-rate arithmetic and formatting shared by every summary
//! - Printing batch, fan-out and resume summaries at the end of a stage
//! - Loading and printing ledger statistics

pub mod stats;

pub use stats::{load_statistics, print_statistics, LedgerStatistics};

use crate::pipeline::{FanOutReport, ResumeSummary};
use crate::runner::BatchReport;
use crate::ErrorKind;
use std::collections::BTreeMap;

/// Failures shown per summary before the rest are elided
const MAX_LISTED_FAILURES: usize = 10;

/// `succeeded / (succeeded + failed) * 100`, or 0 when both are 0
pub fn success_rate(succeeded: u64, failed: u64) -> f64 {
    let attempted = succeeded + failed;
    if attempted == 0 {
        0.0
    } else {
        succeeded as f64 / attempted as f64 * 100.0
    }
}

/// Success rate as shown in summaries: one decimal, or `0%` when nothing was attempted
pub fn format_success_rate(succeeded: u64, failed: u64) -> String {
    if succeeded + failed == 0 {
        "0%".to_string()
    } else {
        format!("{:.1}%", success_rate(succeeded, failed))
    }
}

/// Prints the summary of one batch
pub fn print_batch_report<T>(report: &BatchReport<T>) {
    println!("=== {} ===", report.label);
    println!("  Units: {}", report.total);
    println!("  Succeeded: {}", report.succeeded());
    println!("  Failed: {}", report.failed());
    if report.cancelled {
        println!("  Not started (cancelled): {}", report.abandoned());
    }
    println!(
        "  Success rate: {}",
        format_success_rate(report.succeeded() as u64, report.failed() as u64)
    );
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());

    print_failure_kinds(&report.failures_by_kind());

    if !report.failures.is_empty() {
        println!("  Failures:");
        for failure in report.failures.iter().take(MAX_LISTED_FAILURES) {
            println!("    {} [{}]: {}", failure.id, failure.kind, failure.message);
        }
        if report.failures.len() > MAX_LISTED_FAILURES {
            println!(
                "    ... and {} more",
                report.failures.len() - MAX_LISTED_FAILURES
            );
        }
    }
}

/// Prints the summary of a Chunked Producer run
pub fn print_fan_out(links: usize, report: &FanOutReport) {
    println!("=== Chunked producer ===");
    println!("  Links: {}", links);
    println!("  Chunks: {}", report.chunks);
    println!("  Sent: {}", report.sent);
    println!("  Failed: {}", report.failed);
    println!(
        "  Success rate: {}",
        format_success_rate(report.sent, report.failed)
    );
    for (number, error) in &report.failed_chunks {
        println!("    chunk {}: {}", number, error);
    }
}

/// Prints the summary of a resumable session
pub fn print_resume_summary(summary: &ResumeSummary) {
    println!("=== Resume ===");
    println!("  Chunk files: {}", summary.chunks_total);
    println!("  Already processed: {}", summary.already_processed);
    println!("  Processed now: {}", summary.processed_now.len());
    println!("  Remaining: {}", summary.remaining());
    println!(
        "  Details: {} succeeded, {} failed ({})",
        summary.counts.succeeded,
        summary.counts.failed,
        format_success_rate(summary.counts.succeeded, summary.counts.failed)
    );

    print_failure_kinds(&summary.failures_by_kind);

    if !summary.skipped.is_empty() {
        println!("  Skipped this session:");
        for (name, reason) in &summary.skipped {
            println!("    {}: {}", name, reason);
        }
    }
    if summary.cancelled {
        println!("  Stopped by operator; unfinished chunks will be picked up next run");
    }
}

fn print_failure_kinds(kinds: &BTreeMap<ErrorKind, usize>) {
    if kinds.is_empty() {
        return;
    }
    println!("  Failures by kind:");
    for (kind, count) in kinds {
        println!("    {}: {}", kind, count);
    }
}
