//! Cleanup run orchestration.
//!
//! One run walks the partitions of a single table in enumeration order,
//! scans each partition's rows in store order and deletes the rows that
//! break the retention rule. Everything is sequential. Failures reading a
//! partition or deleting a row are logged and counted; only losing
//! connectivity during enumeration ends the run with an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::deleter::{DeleteError, DeleteOutcome, Deleter};
use crate::enumerator::{DEFAULT_FALLBACK_PAGE_SIZE, EnumerationError, PartitionEnumerator};
use crate::keys::PartitionKey;
use crate::metrics::{CleanupMetrics, CleanupReport};
use crate::retention::RetentionRule;
use crate::scanner::{RowScanner, ScanError};
use crate::schema::{SchemaError, TableSchema};
use crate::store::StoreSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Log deletes instead of issuing them.
    pub dry_run: bool,
    /// Skip partition keys that were already processed.
    pub dedupe: bool,
    pub fallback_page_size: i32,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            dedupe: false,
            fallback_page_size: DEFAULT_FALLBACK_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
}

pub struct TableCleaner {
    session: StoreSession,
    schema: Arc<TableSchema>,
    rule: RetentionRule,
    options: CleanupOptions,
    metrics: CleanupMetrics,
}

impl TableCleaner {
    /// Fails if the rule's predicate names a column the table does not have.
    pub fn new(
        session: StoreSession,
        schema: TableSchema,
        rule: RetentionRule,
        options: CleanupOptions,
    ) -> Result<Self, CleanupError> {
        if let Some(predicate) = rule.predicate() {
            if !schema.has_column(&predicate.column) {
                return Err(SchemaError::UnknownColumn {
                    table: format!("{}.{}", schema.keyspace(), schema.table()),
                    column: predicate.column.clone(),
                }
                .into());
            }
        }

        Ok(Self {
            session,
            schema: Arc::new(schema),
            rule,
            options,
            metrics: CleanupMetrics::new(),
        })
    }

    pub async fn run(&self) -> Result<CleanupReport, CleanupError> {
        let started = Instant::now();
        let table = format!("{}.{}", self.schema.keyspace(), self.schema.table());
        info!(
            table = %table,
            dry_run = self.options.dry_run,
            threshold = ?self.rule.threshold(),
            predicate = ?self.rule.predicate(),
            "Starting cleanup"
        );

        let extra: Vec<String> = self
            .rule
            .predicate()
            .map(|p| p.column.clone())
            .into_iter()
            .collect();
        let scanner = RowScanner::with_columns(self.session.clone(), self.schema.clone(), &extra);
        let deleter = Deleter::new(
            self.session.clone(),
            self.schema.clone(),
            self.options.dry_run,
        );
        let mut enumerator = PartitionEnumerator::new(self.session.clone(), self.schema.clone())
            .with_page_size(self.options.fallback_page_size);

        let mut seen: HashSet<PartitionKey> = HashSet::new();
        while let Some(next) = enumerator.next_partition().await {
            let key = next?;
            self.metrics.record_partition();

            if self.options.dedupe && !seen.insert(key.clone()) {
                debug!(partition = %key, "Partition already processed");
                self.metrics.record_repeated_partition();
                continue;
            }

            if let Err(ScanError::Fetch { partition, source }) =
                self.clean_partition(&scanner, &deleter, &key).await
            {
                error!(partition = %partition, error = %source, "Failed to read partition rows");
                self.metrics.record_partition_failure();
            }
        }

        let report = CleanupReport::from_metrics(
            table,
            self.options.dry_run,
            &self.metrics,
            enumerator.fallback_engaged(),
            enumerator.truncated(),
            started.elapsed(),
        );
        info!(
            partitions = report.partitions_enumerated,
            rows_selected = report.rows_selected,
            rows_deleted = report.rows_deleted,
            "Cleanup finished"
        );
        Ok(report)
    }

    async fn clean_partition(
        &self,
        scanner: &RowScanner,
        deleter: &Deleter,
        key: &PartitionKey,
    ) -> Result<(), ScanError> {
        let mut rows = scanner.scan_partition(key).await?;

        while let Some(row) = rows.next().await {
            let row = row?;
            self.metrics.record_row_scanned();

            let verdict = self.rule.evaluate(&row);
            if !verdict.should_delete() {
                debug!(
                    partition = %key,
                    ttl = ?row.ttl(),
                    write_time = ?row.write_time(),
                    verdict = %verdict,
                    "Keeping row"
                );
                continue;
            }
            self.metrics.record_row_selected();

            match deleter.delete(&row).await {
                Ok(DeleteOutcome::Deleted) => self.metrics.record_row_deleted(),
                Ok(DeleteOutcome::DryRun) => {}
                Err(DeleteError::Store { key, source }) => {
                    error!(row = %key, error = %source, "Failed to delete row");
                    self.metrics.record_delete_failure();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::SelectivePredicate;
    use crate::store::{ColumnValue, StoreErrorKind};
    use crate::testing::{DistinctMode, MemoryRow, MemoryStore};

    fn schema() -> TableSchema {
        TableSchema::new(
            "app",
            "events",
            vec!["user_id".into()],
            vec!["event_id".into()],
            vec!["payload".into(), "region".into()],
        )
        .unwrap()
    }

    fn event(user: i32, event: i32, ttl: i64, region: &str) -> MemoryRow {
        MemoryRow::new()
            .column("user_id", user)
            .column("event_id", event)
            .column("payload", "p")
            .column("region", region)
            .ttl(ttl)
            .writetime(1_000)
    }

    fn ttl_rule(max: i64) -> RetentionRule {
        RetentionRule::from_limits(Some(max), None).unwrap()
    }

    #[tokio::test]
    async fn test_deletes_only_rows_breaking_the_rule() {
        let store = Arc::new(
            MemoryStore::new(schema())
                .with_row(event(1, 1, 100, "eu"))
                .with_row(event(1, 2, 10, "eu"))
                .with_row(event(2, 1, 500, "us")),
        );
        let cleaner = TableCleaner::new(
            store.session(),
            schema(),
            ttl_rule(50),
            CleanupOptions::default(),
        )
        .unwrap();

        let report = cleaner.run().await.unwrap();
        assert_eq!(report.partitions_enumerated, 2);
        assert_eq!(report.rows_scanned, 3);
        assert_eq!(report.rows_deleted, 2);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_predicate_column_must_exist() {
        let store = Arc::new(MemoryStore::new(schema()));
        let rule = ttl_rule(0).with_predicate(SelectivePredicate::new("country", "us"));

        let err = TableCleaner::new(store.session(), schema(), rule, CleanupOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CleanupError::Schema(SchemaError::UnknownColumn { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_failures_do_not_stop_the_run() {
        let store = Arc::new(
            MemoryStore::new(schema())
                .with_row(event(1, 1, 100, "eu"))
                .with_row(event(2, 1, 100, "eu"))
                .fail_deletes(StoreErrorKind::Timeout),
        );
        let cleaner = TableCleaner::new(
            store.session(),
            schema(),
            ttl_rule(50),
            CleanupOptions::default(),
        )
        .unwrap();

        let report = cleaner.run().await.unwrap();
        assert_eq!(report.rows_selected, 2);
        assert_eq!(report.delete_failures, 2);
        assert_eq!(report.rows_deleted, 0);
    }

    #[tokio::test]
    async fn test_dedupe_skips_partitions_repeated_by_the_fallback() {
        let mut store = MemoryStore::new(schema())
            .with_distinct(DistinctMode::FailAfter(2, StoreErrorKind::Timeout));
        for user in 0..5 {
            store.insert(event(user, 1, 10, "eu"));
        }
        let store = Arc::new(store);

        let options = CleanupOptions {
            dedupe: true,
            ..CleanupOptions::default()
        };
        let cleaner = TableCleaner::new(store.session(), schema(), ttl_rule(50), options).unwrap();

        let report = cleaner.run().await.unwrap();
        assert!(report.fallback_engaged);
        assert_eq!(report.partitions_enumerated, 7);
        assert_eq!(report.partitions_repeated, 2);
        assert_eq!(report.rows_scanned, 5);
    }

    #[tokio::test]
    async fn test_connectivity_loss_fails_the_run() {
        let store = Arc::new(
            MemoryStore::new(schema())
                .with_row(event(1, 1, 100, "eu"))
                .with_distinct(DistinctMode::Reject(StoreErrorKind::Connection)),
        );
        let cleaner = TableCleaner::new(
            store.session(),
            schema(),
            ttl_rule(50),
            CleanupOptions::default(),
        )
        .unwrap();

        let err = cleaner.run().await.unwrap_err();
        assert!(matches!(err, CleanupError::Enumeration(_)));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_scan_failure_moves_to_next_partition() {
        let store = Arc::new(
            MemoryStore::new(schema())
                .with_row(event(1, 1, 100, "eu"))
                .with_row(event(2, 1, 100, "eu"))
                .fail_scan_of(vec![ColumnValue::Int(1)], StoreErrorKind::Timeout),
        );
        let cleaner = TableCleaner::new(
            store.session(),
            schema(),
            ttl_rule(50),
            CleanupOptions::default(),
        )
        .unwrap();

        let report = cleaner.run().await.unwrap();
        assert_eq!(report.partitions_enumerated, 2);
        assert_eq!(report.partition_failures, 1);
        assert_eq!(report.rows_deleted, 1);
    }
}
