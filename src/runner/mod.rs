//! Batch Runner
//!
//! Runs a list of work units through a bounded pool of async workers:
//! - At most `worker_count()` units execute at once; `queue-depth` units wait ahead of them
//! - Every started unit yields exactly one outcome, including units whose worker panics
//! - Outcomes are aggregated by the caller's task, never through shared mutable state
//! - A progress line is logged every `progress-every` completed units
//! - Cancellation stops new units from starting and lets in-flight units finish

mod report;

pub use report::{BatchReport, UnitFailure};

use crate::config::RunnerConfig;
use crate::EtlError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One independent piece of work with a stable identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit<P> {
    /// Page index, listing id, chunk key, ...
    pub id: String,
    pub payload: P,
}

impl<P> WorkUnit<P> {
    pub fn new(id: impl Into<String>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Bounded worker pool shared by every stage
#[derive(Debug, Clone)]
pub struct BatchRunner {
    workers: usize,
    queue_depth: usize,
    progress_every: u64,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            workers: config.worker_count(),
            queue_depth: config.queue_depth.max(1),
            progress_every: config.progress_every.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the runner's cancellation token, e.g. with one wired to Ctrl+C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of workers a batch runs on
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every unit through `worker` and aggregates the outcomes
    ///
    /// # Arguments
    ///
    /// * `label` - Stage name used in log lines and the report
    /// * `units` - Units to run, submitted in order
    /// * `worker` - Async function applied to each unit's payload
    ///
    /// # Returns
    ///
    /// A report with one outcome per started unit. If the runner was cancelled before
    /// every unit started, `cancelled` is set and the remainder is counted as abandoned.
    pub async fn run<P, T, F, Fut>(
        &self,
        label: &str,
        units: Vec<WorkUnit<P>>,
        worker: F,
    ) -> BatchReport<T>
    where
        P: Send + 'static,
        T: Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, EtlError>> + Send + 'static,
    {
        let started = Instant::now();
        let total = units.len();
        let pool_size = self.workers.min(total);

        tracing::info!(
            "Starting {}: {} units on {} workers",
            label,
            total,
            pool_size
        );

        let (unit_tx, unit_rx) = mpsc::channel::<WorkUnit<P>>(self.queue_depth);
        let unit_rx = Arc::new(Mutex::new(unit_rx));
        let (outcome_tx, mut outcome_rx) =
            mpsc::unbounded_channel::<(String, Result<T, UnitFailure>)>();
        let worker = Arc::new(worker);

        let feeder_cancel = self.cancel.clone();
        let feeder = tokio::spawn(async move {
            for unit in units {
                tokio::select! {
                    biased;
                    _ = feeder_cancel.cancelled() => break,
                    sent = unit_tx.send(unit) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut pool = JoinSet::new();
        for _ in 0..pool_size {
            let unit_rx = unit_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let worker = worker.clone();
            let cancel = self.cancel.clone();

            pool.spawn(async move {
                loop {
                    let next = {
                        let mut rx = unit_rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            unit = rx.recv() => unit,
                        }
                    };
                    let Some(WorkUnit { id, payload }) = next else {
                        break;
                    };

                    let outcome = match AssertUnwindSafe((*worker)(payload)).catch_unwind().await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(UnitFailure::from_error(&id, &e)),
                        Err(panic) => Err(UnitFailure::panicked(&id, panic_message(&*panic))),
                    };

                    if outcome_tx.send((id, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(outcome_tx);

        let mut report = BatchReport::new(label, total);
        while let Some((id, outcome)) = outcome_rx.recv().await {
            match outcome {
                Ok(value) => {
                    tracing::debug!("{} {} succeeded", label, id);
                    report.successes.push((id, value));
                }
                Err(failure) => {
                    tracing::warn!(
                        "{} {} failed ({}): {}",
                        label,
                        failure.id,
                        failure.kind,
                        failure.message
                    );
                    report.failures.push(failure);
                }
            }

            let done = report.submitted();
            if done as u64 % self.progress_every == 0 {
                tracing::info!("Progress: {}/{} {} completed", done, total, label);
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!("{} worker task ended abnormally: {}", label, e);
            }
        }
        if let Err(e) = feeder.await {
            tracing::error!("{} feeder task ended abnormally: {}", label, e);
        }

        report.cancelled = report.submitted() < total && self.cancel.is_cancelled();
        report.elapsed = started.elapsed();

        if report.cancelled {
            tracing::warn!(
                "{} cancelled: {} of {} units started, {} abandoned",
                label,
                report.submitted(),
                total,
                report.abandoned()
            );
        }
        tracing::info!(
            "Finished {}: {} succeeded, {} failed in {:.1}s",
            label,
            report.succeeded(),
            report.failed(),
            report.elapsed.as_secs_f64()
        );

        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, FetchError};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn runner(max_concurrency: usize) -> BatchRunner {
        BatchRunner::new(&RunnerConfig {
            max_concurrency,
            queue_depth: 4,
            progress_every: 10,
        })
    }

    fn units(n: usize) -> Vec<WorkUnit<usize>> {
        (0..n).map(|i| WorkUnit::new(i.to_string(), i)).collect()
    }

    #[tokio::test]
    async fn test_every_unit_has_one_outcome() {
        let report = runner(4)
            .run("square", units(25), |n| async move { Ok(n * n) })
            .await;

        assert_eq!(report.total, 25);
        assert_eq!(report.succeeded(), 25);
        assert_eq!(report.failed(), 0);
        assert!(!report.cancelled);

        let ids: HashSet<_> = report.successes.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids.len(), 25);
        assert!(report.successes.contains(&("4".to_string(), 16)));
    }

    #[tokio::test]
    async fn test_failures_carry_kind() {
        let report = runner(2)
            .run("mixed", units(6), |n| async move {
                if n % 2 == 0 {
                    Ok(n)
                } else {
                    Err(EtlError::from(FetchError::Timeout {
                        url: format!("https://example.com/{}", n),
                    }))
                }
            })
            .await;

        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.failures_by_kind().get(&ErrorKind::Timeout), Some(&3));
        assert!((report.success_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_one_failure() {
        let report = runner(2)
            .run("panics", units(4), |n| async move {
                if n == 2 {
                    panic!("boom on {}", n);
                }
                Ok(n)
            })
            .await;

        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].id, "2");
        assert_eq!(report.failures[0].kind, ErrorKind::Internal);
        assert!(report.failures[0].message.contains("boom on 2"));
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_pool() {
        let runner = runner(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f, p) = (in_flight.clone(), peak.clone());
        let report = runner
            .run("bounded", units(20), move |n| {
                let (f, p) = (f.clone(), p.clone());
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok(n)
                }
            })
            .await;

        assert_eq!(report.succeeded(), 20);
        assert!(peak.load(Ordering::SeqCst) <= runner.workers());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = runner(4)
            .run("empty", Vec::<WorkUnit<usize>>::new(), |n| async move { Ok(n) })
            .await;
        assert_eq!(report.total, 0);
        assert_eq!(report.success_rate(), 0.0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let runner = runner(4);
        runner.cancellation_token().cancel();

        let report = runner.run("cancelled", units(10), |n| async move { Ok(n) }).await;
        assert!(report.cancelled);
        assert_eq!(report.submitted(), 0);
        assert_eq!(report.abandoned(), 10);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_lets_in_flight_finish() {
        let runner = runner(2);
        let token = runner.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            token.cancel();
        });

        let report = runner
            .run("slow", units(200), |n| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(n)
            })
            .await;

        assert!(report.cancelled);
        assert!(report.submitted() > 0);
        assert!(report.submitted() < 200);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.submitted() + report.abandoned(), 200);
    }
}
