use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, future};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cql;
use crate::keys::PartitionKey;
use crate::schema::TableSchema;
use crate::store::{ColumnValue, Row, StoreError, StoreSession};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read rows of partition {partition}")]
    Fetch {
        partition: String,
        #[source]
        source: StoreError,
    },
}

/// One row of a partition with the representative column's write metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    primary_key: Vec<ColumnValue>,
    columns: Vec<(String, Option<ColumnValue>)>,
    write_time: Option<i64>,
    ttl: Option<i64>,
}

impl CandidateRow {
    pub fn new(primary_key: Vec<ColumnValue>, write_time: Option<i64>, ttl: Option<i64>) -> Self {
        Self {
            primary_key,
            columns: Vec::new(),
            write_time,
            ttl,
        }
    }

    /// Attach a named column value, `None` for null.
    pub fn with_value(mut self, name: impl Into<String>, value: Option<ColumnValue>) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    /// Partition then clustering key values.
    pub fn primary_key(&self) -> &[ColumnValue] {
        &self.primary_key
    }

    /// Write time of the representative column in microseconds.
    pub fn write_time(&self) -> Option<i64> {
        self.write_time
    }

    /// Remaining TTL of the representative column in seconds.
    pub fn ttl(&self) -> Option<i64> {
        self.ttl
    }

    pub fn value(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .and_then(|(_, value)| value.as_ref())
    }

    fn from_row(schema: &TableSchema, row: Row) -> Option<Self> {
        let primary_key = schema
            .primary_key()
            .map(|c| row.get(c).cloned())
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            primary_key,
            write_time: row.get_i64(cql::WRITETIME_ALIAS),
            ttl: row.get_i64(cql::TTL_ALIAS),
            columns: row
                .columns()
                .filter(|(name, _)| *name != cql::WRITETIME_ALIAS && *name != cql::TTL_ALIAS)
                .map(|(name, value)| (name.to_string(), value.cloned()))
                .collect(),
        })
    }
}

pub type CandidateStream = BoxStream<'static, Result<CandidateRow, ScanError>>;

/// Reads the rows of one partition at a time.
pub struct RowScanner {
    session: StoreSession,
    schema: Arc<TableSchema>,
    query: String,
}

impl RowScanner {
    pub fn new(session: StoreSession, schema: Arc<TableSchema>) -> Self {
        Self::with_columns(session, schema, &[])
    }

    /// Also select `extra` columns so they can be read from each row.
    pub fn with_columns(session: StoreSession, schema: Arc<TableSchema>, extra: &[String]) -> Self {
        let query = cql::partition_rows(&schema, extra);
        Self {
            session,
            schema,
            query,
        }
    }

    pub async fn scan_partition(&self, key: &PartitionKey) -> Result<CandidateStream, ScanError> {
        debug!(partition = %key, "Scanning partition");
        let partition = key.to_string();
        let rows = self
            .session
            .query(self.query.clone(), key.values().to_vec())
            .await
            .map_err(|source| ScanError::Fetch {
                partition: partition.clone(),
                source,
            })?;

        let schema = self.schema.clone();
        let candidates = rows.filter_map(move |row| {
            let item = match row {
                Ok(row) => match CandidateRow::from_row(&schema, row) {
                    Some(candidate) => Some(Ok(candidate)),
                    None => {
                        warn!(
                            partition = %partition,
                            "Skipping row with null clustering columns"
                        );
                        None
                    }
                },
                Err(source) => Some(Err(ScanError::Fetch {
                    partition: partition.clone(),
                    source,
                })),
            };
            future::ready(item)
        });
        Ok(candidates.boxed())
    }
}
