use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pool::ResourcePool;

/// Task-throughput counters, observed by the scheduler on every
/// lifecycle event. Constructed and owned by the orchestrator, not a
/// process-wide singleton, so tests get isolated instances.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    pub tasks_submitted: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_cancelled: AtomicU64,
    pub tasks_retried: AtomicU64,
    /// Cumulative wall-clock execution time of completed tasks.
    pub execution_millis_total: AtomicU64,
}

/// Point-in-time derived metrics for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub tasks_retried: u64,
    pub avg_execution_millis: f64,
    /// Pool-wide CPU utilization percentage, derived from live state.
    pub utilization_pct: f64,
    /// Completed over completed+failed; 1.0 when nothing finished yet.
    pub efficiency: f64,
    /// In-flight work relative to total pool CPU capacity.
    pub load: f64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, execution_millis: u64) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.execution_millis_total
            .fetch_add(execution_millis, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Derive the reporting snapshot. Utilization and load come from the
    /// live pool so they can never drift from the node table.
    pub fn snapshot(&self, pool: &ResourcePool) -> MetricsSnapshot {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        let failed = self.tasks_failed.load(Ordering::Relaxed);
        let exec_total = self.execution_millis_total.load(Ordering::Relaxed);

        let info = pool.snapshot();
        let reserved_cpu = info.total.cpu - info.available.cpu;
        let load = if info.total.cpu == 0 {
            0.0
        } else {
            f64::from(reserved_cpu) / f64::from(info.total.cpu)
        };
        let efficiency = if completed + failed == 0 {
            1.0
        } else {
            completed as f64 / (completed + failed) as f64
        };
        let avg_execution_millis = if completed == 0 {
            0.0
        } else {
            exec_total as f64 / completed as f64
        };

        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: completed,
            tasks_failed: failed,
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            avg_execution_millis,
            utilization_pct: info.cpu_utilization_pct,
            efficiency,
            load,
        }
    }
}
