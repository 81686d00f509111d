//! tablecleaner
//!
//! Batch job that deletes the rows of one table whose TTL or write time
//! breaks a retention rule, then exits.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleaner::store::scylla::ScyllaSession;
use cleaner::{
    CleanupOptions, RequestOptions, RetentionRule, SchemaInspector, SelectivePredicate,
    StoreSession, TableCleaner,
};
use common::cli::{Args, ConfigError};
use common::config::Configuration;
use common::logging::init_logging;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config =
        Configuration::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let job = args.validate().context("Invalid command line")?;

    let rule = RetentionRule::from_limits(job.max_ttl_seconds, job.min_write_time_micros)
        .ok_or(ConfigError::MissingThreshold)?;
    let rule = match job.selective_match {
        Some((column, value)) => rule.with_predicate(SelectivePredicate::new(column, value)),
        None => rule,
    };

    info!(
        hosts = ?job.hosts,
        keyspace = %job.keyspace,
        table = %job.table,
        dry_run = job.dry_run,
        consistency = %config.store.consistency,
        "Starting tablecleaner"
    );

    let store = ScyllaSession::connect(&job.hosts, &config.store)
        .await
        .with_context(|| format!("Failed to connect to {}", job.hosts.join(",")))?;
    let session = StoreSession::new(Arc::new(store), RequestOptions::from(&config.store));

    let schema = SchemaInspector::new(session.clone())
        .inspect(&job.keyspace, &job.table)
        .await
        .with_context(|| format!("Failed to load schema of {}.{}", job.keyspace, job.table))?;

    let options = CleanupOptions {
        dry_run: job.dry_run,
        dedupe: job.dedupe,
        fallback_page_size: config.store.fallback_page_size,
    };
    let cleaner =
        TableCleaner::new(session, schema, rule, options).context("Invalid cleanup request")?;

    let report = cleaner.run().await.context("Cleanup aborted")?;
    report.log();

    Ok(())
}
