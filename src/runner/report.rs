use crate::storage::RunCounts;
use crate::{ErrorKind, EtlError};
use std::collections::BTreeMap;
use std::time::Duration;

/// A unit that finished with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl UnitFailure {
    pub fn from_error(id: &str, error: &EtlError) -> Self {
        Self {
            id: id.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn panicked(id: &str, message: String) -> Self {
        Self {
            id: id.to_string(),
            kind: ErrorKind::Internal,
            message: format!("worker panicked: {}", message),
        }
    }
}

/// Aggregated outcome of one batch
#[derive(Debug)]
pub struct BatchReport<T> {
    pub label: String,
    /// Units handed to the runner
    pub total: usize,
    /// `(unit id, value)` for every unit that succeeded, in completion order
    pub successes: Vec<(String, T)>,
    pub failures: Vec<UnitFailure>,
    /// Set when cancellation left some units unstarted
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl<T> BatchReport<T> {
    pub fn new(label: &str, total: usize) -> Self {
        Self {
            label: label.to_string(),
            total,
            successes: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.successes.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Units that started (and therefore finished)
    pub fn submitted(&self) -> usize {
        self.succeeded() + self.failed()
    }

    /// Units that never started because of cancellation
    pub fn abandoned(&self) -> usize {
        self.total.saturating_sub(self.submitted())
    }

    /// `succeeded / (succeeded + failed)` as a percentage; 0 when nothing finished
    pub fn success_rate(&self) -> f64 {
        crate::output::success_rate(self.succeeded() as u64, self.failed() as u64)
    }

    pub fn failures_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            submitted: self.submitted() as u64,
            succeeded: self.succeeded() as u64,
            failed: self.failed() as u64,
        }
    }
}
