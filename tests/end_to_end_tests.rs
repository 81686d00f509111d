use std::io;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cleaner::testing::{DistinctMode, MemoryRow, MemoryStore};
use cleaner::{
    CleanupOptions, CleanupReport, ColumnValue, RetentionRule, SchemaInspector,
    SelectivePredicate, StoreErrorKind, TableCleaner, TableSchema,
};
use common::cli::Args;
use tracing::Level;

fn events_schema() -> TableSchema {
    TableSchema::new(
        "app",
        "events",
        vec!["user_id".into()],
        vec!["event_id".into()],
        vec!["payload".into(), "region".into()],
    )
    .unwrap()
}

fn event(user: &str, event: i32, ttl: i64, region: &str) -> MemoryRow {
    MemoryRow::new()
        .column("user_id", user)
        .column("event_id", event)
        .column("payload", "{}")
        .column("region", region)
        .ttl(ttl)
        .writetime(1_700_000_000_000_000)
}

/// Wire a run the way the binary does, over the in-memory store.
async fn run(store: &Arc<MemoryStore>, argv: &[&str]) -> CleanupReport {
    let args = Args::parse_from(std::iter::once("tablecleaner").chain(argv.iter().copied()));
    let job = args.validate().unwrap();

    let mut rule =
        RetentionRule::from_limits(job.max_ttl_seconds, job.min_write_time_micros).unwrap();
    if let Some((column, value)) = job.selective_match {
        rule = rule.with_predicate(SelectivePredicate::new(column, value));
    }

    let session = store.session();
    let schema = SchemaInspector::new(session.clone())
        .inspect(&job.keyspace, &job.table)
        .await
        .unwrap();
    let options = CleanupOptions {
        dry_run: job.dry_run,
        dedupe: job.dedupe,
        ..CleanupOptions::default()
    };

    TableCleaner::new(session, schema, rule, options)
        .unwrap()
        .run()
        .await
        .unwrap()
}

const EVENTS: &[&str] = &["--host", "10.0.0.1", "--keyspace", "app", "--table", "events"];

fn argv<'a>(extra: &[&'a str]) -> Vec<&'a str> {
    EVENTS.iter().copied().chain(extra.iter().copied()).collect()
}

#[tokio::test]
async fn test_ttl_zero_deletes_row_by_full_primary_key() {
    let store = Arc::new(MemoryStore::new(events_schema()).with_row(event("u1", 7, 86_400, "eu")));

    let report = run(&store, &argv(&["--ttl", "0"])).await;

    assert_eq!(report.rows_deleted, 1);
    let executed = store.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0].cql,
        "DELETE FROM \"app\".\"events\" WHERE \"user_id\" = ? AND \"event_id\" = ?"
    );
    assert_eq!(
        executed[0].values,
        vec![ColumnValue::from("u1"), ColumnValue::Int(7)]
    );
    assert_eq!(store.row_count(), 0);
}

/// Log sink shared with the subscriber of one test.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLog {
    /// Lines logged for deletes a dry run would have issued.
    fn take_dry_run_deletes(&self) -> Vec<String> {
        let bytes = std::mem::take(&mut *self.0.lock().unwrap());
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter(|line| line.contains("[DRY RUN] Would issue DELETE"))
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn test_dry_run_is_repeatable_and_never_mutates() {
    let store = Arc::new(
        MemoryStore::new(events_schema())
            .with_row(event("u1", 1, 86_400, "eu"))
            .with_row(event("u1", 2, 10, "eu"))
            .with_row(event("u2", 1, 3_600, "us")),
    );
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let first = run(&store, &argv(&["--ttl", "60", "--test"])).await;
    let first_deletes = log.take_dry_run_deletes();
    let second = run(&store, &argv(&["--ttl", "60", "--test"])).await;
    let second_deletes = log.take_dry_run_deletes();

    assert!(first.dry_run);
    assert_eq!(first.rows_selected, 2);
    assert_eq!(first.rows_deleted, 0);
    assert_eq!(
        (first.partitions_enumerated, first.rows_scanned, first.rows_selected),
        (second.partitions_enumerated, second.rows_scanned, second.rows_selected)
    );

    assert_eq!(first_deletes.len(), 2);
    assert_eq!(first_deletes, second_deletes);
    let delete = "DELETE FROM \"app\".\"events\" WHERE \"user_id\" = ? AND \"event_id\" = ?";
    assert!(first_deletes.iter().all(|line| line.contains(delete)));
    assert!(first_deletes.iter().any(|line| line.contains("params=[u1, 1]")));
    assert!(first_deletes.iter().any(|line| line.contains("params=[u2, 1]")));

    assert!(store.executed().is_empty());
    assert_eq!(store.row_count(), 3);
}

#[tokio::test]
async fn test_empty_table_issues_no_scans_or_deletes() {
    let store = Arc::new(MemoryStore::new(events_schema()));

    let report = run(&store, &argv(&["--ttl", "0"])).await;

    assert_eq!(report.partitions_enumerated, 0);
    assert_eq!(report.rows_scanned, 0);
    assert!(store.executed().is_empty());
    assert!(
        store
            .queries()
            .iter()
            .all(|q| !q.contains("cleaner_writetime"))
    );
}

#[tokio::test]
async fn test_selective_predicate_keeps_other_values() {
    let store = Arc::new(
        MemoryStore::new(events_schema())
            .with_row(event("u1", 1, 86_400, "eu"))
            .with_row(event("u2", 1, 86_400, "us")),
    );

    let report = run(
        &store,
        &argv(&[
            "--ttl",
            "60",
            "--match_column_name",
            "region",
            "--match_column_value",
            "us",
        ]),
    )
    .await;

    assert_eq!(report.rows_scanned, 2);
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(store.executed()[0].values[0], ColumnValue::from("u2"));
}

#[tokio::test]
async fn test_write_time_rule_on_legacy_store_uses_token_walk() {
    let mut store = MemoryStore::new(events_schema())
        .with_legacy_metadata()
        .with_distinct(DistinctMode::Reject(StoreErrorKind::Unsupported));
    for user in 0..30 {
        store.insert(
            MemoryRow::new()
                .column("user_id", format!("u{user}"))
                .column("event_id", 1)
                .column("payload", "{}")
                .writetime(if user % 2 == 0 { 100 } else { 10_000 }),
        );
    }
    let store = Arc::new(store);

    let report = run(&store, &argv(&["--timestamp", "1000"])).await;

    assert!(report.fallback_engaged);
    assert!(!report.truncated);
    assert_eq!(report.partitions_enumerated, 30);
    assert_eq!(report.rows_deleted, 15);
    assert_eq!(store.row_count(), 15);
}

#[tokio::test]
async fn test_static_column_is_matchable_but_not_representative() {
    let schema = TableSchema::new(
        "app",
        "events",
        vec!["user_id".into()],
        vec!["event_id".into()],
        vec!["payload".into()],
    )
    .unwrap()
    .with_static_columns(vec!["bucket_meta".into()])
    .unwrap();
    let row = |user: &str, meta: &str| {
        MemoryRow::new()
            .column("user_id", user)
            .column("event_id", 1)
            .column("bucket_meta", meta)
            .column("payload", "{}")
            .ttl(86_400)
    };
    let store = Arc::new(
        MemoryStore::new(schema)
            .with_row(row("u1", "hot"))
            .with_row(row("u2", "cold")),
    );

    let report = run(
        &store,
        &argv(&[
            "--ttl",
            "60",
            "--match_column_name",
            "bucket_meta",
            "--match_column_value",
            "hot",
        ]),
    )
    .await;

    assert_eq!(report.rows_deleted, 1);
    assert_eq!(store.executed()[0].values[0], ColumnValue::from("u1"));
    let scans: Vec<String> = store
        .queries()
        .into_iter()
        .filter(|q| q.contains("cleaner_writetime"))
        .collect();
    assert!(!scans.is_empty());
    assert!(scans.iter().all(|q| q.contains("TTL(\"payload\")")));
}
