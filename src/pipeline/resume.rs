//! Resumable detail fetching over chunk files
//!
//! Picks one not-yet-processed chunk at a time (at random, or in chunk order), fetches
//! every detail in it, and only then records the chunk in the ledger's ProcessedSet.
//! A chunk interrupted part-way is not recorded and is redone in full next time.

use super::chunks::list_chunks;
use super::details::fetch_chunk_details;
use super::Pipeline;
use crate::runner::BatchRunner;
use crate::storage::{Ledger, RunCounts};
use crate::{ErrorKind, EtlError};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// How the next chunk is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickOrder {
    #[default]
    Random,
    Ordered,
}

/// Outcome of one resumable session
#[derive(Debug, Default)]
pub struct ResumeSummary {
    pub chunks_total: usize,
    /// Chunks already in the ProcessedSet when the session started
    pub already_processed: usize,
    /// Chunks completed and recorded by this session, in processing order
    pub processed_now: Vec<String>,
    /// Chunks that could not be read, with the reason; retried next session
    pub skipped: Vec<(String, String)>,
    /// Detail units across every chunk this session touched
    pub counts: RunCounts,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub cancelled: bool,
}

impl ResumeSummary {
    pub fn remaining(&self) -> usize {
        self.chunks_total
            .saturating_sub(self.already_processed + self.processed_now.len())
    }
}

/// Runs the pick-a-chunk loop until every chunk is processed, skipped, or the runner is
/// cancelled
///
/// # Arguments
///
/// * `pipeline` - Shared client, config and store
/// * `runner` - Worker pool; its cancellation token stops the loop
/// * `ledger` - Holds the ProcessedSet
/// * `run_id` - Ledger run credited with the chunks processed now
/// * `order` - Random or chunk-number order
/// * `rng` - Source of randomness for `PickOrder::Random`
pub async fn run_resumable<L, R>(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    ledger: &mut L,
    run_id: i64,
    order: PickOrder,
    rng: &mut R,
) -> Result<ResumeSummary, EtlError>
where
    L: Ledger + ?Sized,
    R: Rng + ?Sized,
{
    let location = pipeline.config.chunks_location()?;
    let names = list_chunks(pipeline.store.as_ref(), &location).await?;
    let processed = ledger.processed_chunks()?;

    let mut summary = ResumeSummary {
        chunks_total: names.len(),
        ..ResumeSummary::default()
    };

    let mut remaining: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if processed.contains(&location.key(&name)) {
            summary.already_processed += 1;
        } else {
            remaining.push(name);
        }
    }

    tracing::info!(
        "Found {} chunk files ({} already processed, {} remaining)",
        summary.chunks_total,
        summary.already_processed,
        remaining.len()
    );

    while !remaining.is_empty() && !runner.is_cancelled() {
        let picked = match order {
            PickOrder::Random => remaining.choose(rng).cloned(),
            PickOrder::Ordered => remaining.first().cloned(),
        };
        let Some(name) = picked else {
            break;
        };
        remaining.retain(|n| n != &name);

        tracing::info!(
            "[{}/{}] Selected {}",
            summary.already_processed + summary.processed_now.len() + 1,
            summary.chunks_total,
            name
        );

        let report = match fetch_chunk_details(pipeline, runner, &name).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Skipping {} for this session: {}", name, e);
                summary.skipped.push((name, e.to_string()));
                continue;
            }
        };

        summary.counts.add(report.counts());
        for (kind, count) in report.failures_by_kind() {
            *summary.failures_by_kind.entry(kind).or_insert(0) += count;
        }

        if report.cancelled {
            tracing::warn!("{} interrupted; it will be redone on the next run", name);
            break;
        }

        ledger.mark_chunk_processed(&location.key(&name), run_id)?;
        tracing::info!(
            "Completed {}: {} succeeded, {} failed",
            name,
            report.succeeded(),
            report.failed()
        );
        summary.processed_now.push(name);
    }

    summary.cancelled = runner.is_cancelled() && summary.remaining() > summary.skipped.len();

    if summary.cancelled {
        tracing::warn!(
            "Stopped by operator. Processed {}/{} chunk files",
            summary.already_processed + summary.processed_now.len(),
            summary.chunks_total
        );
    } else if summary.skipped.is_empty() {
        tracing::info!("All {} chunk files processed", summary.chunks_total);
    }

    Ok(summary)
}
