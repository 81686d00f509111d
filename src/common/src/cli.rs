use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

/// Command line of the cleanup job.
///
/// Required values are optional at the clap level so that a missing value is
/// reported through [`ConfigError`] like every other validation failure.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "tablecleaner",
    version,
    about = "Iterates over a CQL table and deletes rows whose TTL or write time violates a retention rule",
    long_about = "tablecleaner iterates over a CQL table and deletes old entries. CQL TTLs cannot \
                  cover every case: counter columns cannot carry a TTL, and an application may \
                  want to shorten a TTL that was already applied and purge older data instead of \
                  waiting for the original expiry."
)]
pub struct Args {
    /// Store endpoints, comma separated
    #[arg(long)]
    pub host: Option<String>,

    /// Keyspace holding the table
    #[arg(long)]
    pub keyspace: Option<String>,

    /// Table to clean
    #[arg(long)]
    pub table: Option<String>,

    /// Delete rows with a TTL higher than this many seconds
    #[arg(long)]
    pub ttl: Option<String>,

    /// Delete rows with a WRITETIME lower than this many microseconds
    #[arg(long)]
    pub timestamp: Option<String>,

    /// Selective delete: only rows where this column has the value given by --match_column_value
    #[arg(long = "match_column_name")]
    pub match_column_name: Option<String>,

    /// Selective delete: only rows whose --match_column_name equals this value (string comparison)
    #[arg(long = "match_column_value")]
    pub match_column_value: Option<String>,

    /// Test only: log the DELETE statements but do not execute them
    #[arg(long)]
    pub test: bool,

    /// Skip partition keys that were already produced once during this run
    #[arg(long)]
    pub dedupe: bool,

    /// Optional TOML file with store tunables
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// A validated cleanup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub table: String,
    pub max_ttl_seconds: Option<i64>,
    pub min_write_time_micros: Option<i64>,
    pub selective_match: Option<(String, String)>,
    pub dry_run: bool,
    pub dedupe: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid host")]
    MissingHost,

    #[error("Invalid keyspace")]
    MissingKeyspace,

    #[error("Invalid table")]
    MissingTable,

    #[error("Invalid TTL '{0}': expected an integer number of seconds")]
    InvalidTtl(String),

    #[error("Invalid timestamp '{0}': expected an integer number of microseconds")]
    InvalidTimestamp(String),

    #[error("No TTL or timestamp provided")]
    MissingThreshold,

    #[error("--match_column_name requires --match_column_value")]
    MissingMatchValue,

    #[error("--match_column_value requires --match_column_name")]
    MissingMatchName,
}

impl Args {
    /// Validate the raw arguments, in the order the checks are reported.
    pub fn validate(&self) -> Result<CleanupJob, ConfigError> {
        let hosts: Vec<String> = self
            .host
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if hosts.is_empty() {
            return Err(ConfigError::MissingHost);
        }

        let keyspace = non_empty(self.keyspace.as_deref()).ok_or(ConfigError::MissingKeyspace)?;
        let table = non_empty(self.table.as_deref()).ok_or(ConfigError::MissingTable)?;

        let max_ttl_seconds = match self.ttl.as_deref() {
            None => {
                tracing::debug!("No TTL set");
                None
            }
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidTtl(raw.to_string()))?,
            ),
        };

        let min_write_time_micros = match self.timestamp.as_deref() {
            None => {
                tracing::debug!("No timestamp set");
                None
            }
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidTimestamp(raw.to_string()))?,
            ),
        };

        if max_ttl_seconds.is_none() && min_write_time_micros.is_none() {
            return Err(ConfigError::MissingThreshold);
        }

        let selective_match = match (&self.match_column_name, &self.match_column_value) {
            (Some(name), Some(value)) => {
                tracing::debug!(
                    column = %name,
                    value = %value,
                    "Selective delete - only rows where column evaluates to value"
                );
                Some((name.clone(), value.clone()))
            }
            (Some(_), None) => return Err(ConfigError::MissingMatchValue),
            (None, Some(_)) => return Err(ConfigError::MissingMatchName),
            (None, None) => None,
        };

        Ok(CleanupJob {
            hosts,
            keyspace,
            table,
            max_ttl_seconds,
            min_write_time_micros,
            selective_match,
            dry_run: self.test,
            dedupe: self.dedupe,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
