//! Cleanup Run Metrics
//!
//! Counters for one cleanup run. Clones share the same counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Thread-safe counters for a cleanup run
#[derive(Debug, Clone, Default)]
pub struct CleanupMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Partition keys produced by the enumerator
    partitions_enumerated: AtomicUsize,
    /// Partition keys skipped because they were already processed
    partitions_repeated: AtomicUsize,
    /// Partitions whose rows could not be read
    partition_failures: AtomicUsize,
    /// Rows read from scanned partitions
    rows_scanned: AtomicUsize,
    /// Rows that broke the retention rule
    rows_selected: AtomicUsize,
    /// Rows actually deleted
    rows_deleted: AtomicUsize,
    /// Deletes the store rejected
    delete_failures: AtomicUsize,
}

impl CleanupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_partition(&self) {
        self.inner
            .partitions_enumerated
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repeated_partition(&self) {
        self.inner
            .partitions_repeated
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partition_failure(&self) {
        self.inner.partition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_scanned(&self) {
        self.inner.rows_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_selected(&self) {
        self.inner.rows_selected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_deleted(&self) {
        self.inner.rows_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete_failure(&self) {
        self.inner.delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn partitions_enumerated(&self) -> usize {
        self.inner.partitions_enumerated.load(Ordering::Relaxed)
    }

    pub fn partitions_repeated(&self) -> usize {
        self.inner.partitions_repeated.load(Ordering::Relaxed)
    }

    pub fn partition_failures(&self) -> usize {
        self.inner.partition_failures.load(Ordering::Relaxed)
    }

    pub fn rows_scanned(&self) -> usize {
        self.inner.rows_scanned.load(Ordering::Relaxed)
    }

    pub fn rows_selected(&self) -> usize {
        self.inner.rows_selected.load(Ordering::Relaxed)
    }

    pub fn rows_deleted(&self) -> usize {
        self.inner.rows_deleted.load(Ordering::Relaxed)
    }

    pub fn delete_failures(&self) -> usize {
        self.inner.delete_failures.load(Ordering::Relaxed)
    }
}

/// End-of-run report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub table: String,
    pub dry_run: bool,
    pub partitions_enumerated: usize,
    pub partitions_repeated: usize,
    pub partition_failures: usize,
    pub rows_scanned: usize,
    pub rows_selected: usize,
    pub rows_deleted: usize,
    pub delete_failures: usize,
    pub fallback_engaged: bool,
    /// Enumeration stopped early on a token walk failure
    pub truncated: bool,
    pub elapsed: Duration,
}

impl CleanupReport {
    pub fn from_metrics(
        table: impl Into<String>,
        dry_run: bool,
        metrics: &CleanupMetrics,
        fallback_engaged: bool,
        truncated: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            table: table.into(),
            dry_run,
            partitions_enumerated: metrics.partitions_enumerated(),
            partitions_repeated: metrics.partitions_repeated(),
            partition_failures: metrics.partition_failures(),
            rows_scanned: metrics.rows_scanned(),
            rows_selected: metrics.rows_selected(),
            rows_deleted: metrics.rows_deleted(),
            delete_failures: metrics.delete_failures(),
            fallback_engaged,
            truncated,
            elapsed,
        }
    }

    /// Log the report
    pub fn log(&self) {
        let mode = if self.dry_run { "[DRY RUN] " } else { "" };
        log::info!("=== {}Cleanup Summary for {} ===", mode, self.table);
        log::info!(
            "Partitions: {} enumerated, {} repeated, {} unreadable",
            self.partitions_enumerated,
            self.partitions_repeated,
            self.partition_failures
        );
        log::info!(
            "Rows: {} scanned, {} selected, {} deleted, {} delete failures",
            self.rows_scanned,
            self.rows_selected,
            self.rows_deleted,
            self.delete_failures
        );
        log::info!(
            "Enumeration: {}{}",
            if self.fallback_engaged {
                "token-range fallback"
            } else {
                "SELECT DISTINCT"
            },
            if self.truncated { " (truncated)" } else { "" }
        );
        log::info!("Elapsed: {:.2}s", self.elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_shared_between_clones() {
        let metrics = CleanupMetrics::new();
        let other = metrics.clone();
        other.record_row_scanned();
        other.record_row_scanned();
        metrics.record_row_deleted();

        assert_eq!(metrics.rows_scanned(), 2);
        assert_eq!(other.rows_deleted(), 1);
    }

    #[test]
    fn test_report_snapshot() {
        let metrics = CleanupMetrics::new();
        metrics.record_partition();
        metrics.record_row_scanned();
        metrics.record_row_selected();
        metrics.record_delete_failure();

        let report =
            CleanupReport::from_metrics("app.events", true, &metrics, true, false, Duration::ZERO);
        assert_eq!(report.partitions_enumerated, 1);
        assert_eq!(report.rows_selected, 1);
        assert_eq!(report.rows_deleted, 0);
        assert_eq!(report.delete_failures, 1);
        assert!(report.fallback_engaged);
    }
}
