//! Dispatch metrics
//!
//! Lock-free counters updated by the dispatcher as messages flow through the
//! tree, plus a timer used by the requester.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Start messages accepted by a coordinator
    pub jobs_started: AtomicU64,
    /// Start messages emitted for sub-jobs
    pub child_jobs_dispatched: AtomicU64,
    pub leaf_tasks_dispatched: AtomicU64,
    /// Leaf tasks that took a worker slot and were handed to a worker
    pub leaf_tasks_admitted: AtomicU64,
    pub leaf_tasks_executed: AtomicU64,
    /// Completion reports applied to some coordinator's state
    pub reports_applied: AtomicU64,
    /// Coordinators that reached their total (root included)
    pub coordinators_completed: AtomicU64,
    pub jobs_finished: AtomicU64,
    pub invalid_jobs: AtomicU64,
    pub count_overflows: AtomicU64,
    pub late_reports: AtomicU64,
    pub duplicate_starts: AtomicU64,
    pub work_failures: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            child_jobs_dispatched: self.child_jobs_dispatched.load(Ordering::Relaxed),
            leaf_tasks_dispatched: self.leaf_tasks_dispatched.load(Ordering::Relaxed),
            leaf_tasks_admitted: self.leaf_tasks_admitted.load(Ordering::Relaxed),
            leaf_tasks_executed: self.leaf_tasks_executed.load(Ordering::Relaxed),
            reports_applied: self.reports_applied.load(Ordering::Relaxed),
            coordinators_completed: self.coordinators_completed.load(Ordering::Relaxed),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            invalid_jobs: self.invalid_jobs.load(Ordering::Relaxed),
            count_overflows: self.count_overflows.load(Ordering::Relaxed),
            late_reports: self.late_reports.load(Ordering::Relaxed),
            duplicate_starts: self.duplicate_starts.load(Ordering::Relaxed),
            work_failures: self.work_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub child_jobs_dispatched: u64,
    pub leaf_tasks_dispatched: u64,
    pub leaf_tasks_admitted: u64,
    pub leaf_tasks_executed: u64,
    pub reports_applied: u64,
    pub coordinators_completed: u64,
    pub jobs_finished: u64,
    pub invalid_jobs: u64,
    pub count_overflows: u64,
    pub late_reports: u64,
    pub duplicate_starts: u64,
    pub work_failures: u64,
}

impl MetricsSnapshot {
    /// Errors that indicate a bug or lost work, as opposed to redelivery noise
    pub fn fatal_errors(&self) -> u64 {
        self.invalid_jobs + self.count_overflows + self.work_failures
    }
}

/// Timer for measuring execution duration
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
