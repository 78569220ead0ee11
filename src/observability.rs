use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Workflow engine counters
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub transitions_committed: AtomicU64,
    pub transitions_declined: AtomicU64,
    pub transitions_forced: AtomicU64,
    pub concurrency_conflicts: AtomicU64,
    pub notifications_published: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub scope_evaluations_blocking: AtomicU64,
    pub scope_evaluations_passing: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transition(&self, forced: bool) {
        self.transitions_committed.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.transitions_forced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_declined(&self) {
        self.transitions_declined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.concurrency_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_scope_evaluation(&self, blocking: bool) {
        if blocking {
            self.scope_evaluations_blocking.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scope_evaluations_passing.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            transitions_committed: self.transitions_committed.load(Ordering::Relaxed),
            transitions_declined: self.transitions_declined.load(Ordering::Relaxed),
            transitions_forced: self.transitions_forced.load(Ordering::Relaxed),
            concurrency_conflicts: self.concurrency_conflicts.load(Ordering::Relaxed),
            notifications_published: self.notifications_published.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            scope_evaluations_blocking: self.scope_evaluations_blocking.load(Ordering::Relaxed),
            scope_evaluations_passing: self.scope_evaluations_passing.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Workflow metrics: transitions={}, declined={}, forced={}, conflicts={}, notifications={}, notification_failures={}, blocking_evaluations={}",
            stats.transitions_committed,
            stats.transitions_declined,
            stats.transitions_forced,
            stats.concurrency_conflicts,
            stats.notifications_published,
            stats.notifications_failed,
            stats.scope_evaluations_blocking
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStats {
    pub transitions_committed: u64,
    pub transitions_declined: u64,
    pub transitions_forced: u64,
    pub concurrency_conflicts: u64,
    pub notifications_published: u64,
    pub notifications_failed: u64,
    pub scope_evaluations_blocking: u64,
    pub scope_evaluations_passing: u64,
}

/// Global metrics instance
static WORKFLOW_METRICS: std::sync::LazyLock<WorkflowMetrics> =
    std::sync::LazyLock::new(WorkflowMetrics::new);

pub fn workflow_metrics() -> &'static WorkflowMetrics {
    &WORKFLOW_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        debug!(
            operation = %self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}

#[macro_export]
macro_rules! time_operation {
    ($operation:expr) => {
        let _timer = $crate::observability::OperationTimer::new($operation);
    };
}
