//! In-memory single-table store for tests.
//!
//! [`MemoryStore`] answers exactly the statements the cleaner builds for its
//! table (recognised by comparing against the [`cql`](crate::cql) builders)
//! and fails everything else. Partition tokens come from a stable 64-bit
//! hash, so token order is deterministic but unrelated to key order.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream;

use crate::cql;
use crate::keys::PartitionKey;
use crate::schema::TableSchema;
use crate::store::{
    ColumnValue, CqlSession, RequestOptions, Row, RowStream, Statement, StoreError,
    StoreErrorKind, StoreSession,
};

/// How the store answers `SELECT DISTINCT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctMode {
    Accept,
    /// Refuse the query outright.
    Reject(StoreErrorKind),
    /// Produce this many partitions, then fail the stream.
    FailAfter(usize, StoreErrorKind),
}

/// One stored row. Write metadata belongs to the representative column.
#[derive(Debug, Clone, Default)]
pub struct MemoryRow {
    columns: Vec<(String, Option<ColumnValue>)>,
    writetime: Option<i64>,
    ttl: Option<i64>,
}

impl MemoryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, value: impl Into<ColumnValue>) -> Self {
        self.columns.push((name.to_string(), Some(value.into())));
        self
    }

    pub fn null(mut self, name: &str) -> Self {
        self.columns.push((name.to_string(), None));
        self
    }

    /// Write time in microseconds.
    pub fn writetime(mut self, micros: i64) -> Self {
        self.writetime = Some(micros);
        self
    }

    /// Remaining TTL in seconds.
    pub fn ttl(mut self, seconds: i64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .and_then(|(_, value)| value.as_ref())
    }
}

#[derive(Debug)]
struct State {
    rows: Vec<MemoryRow>,
    queries: Vec<String>,
    executed: Vec<Statement>,
    token_pages: usize,
}

/// A single table held in memory.
#[derive(Debug)]
pub struct MemoryStore {
    schema: TableSchema,
    distinct: DistinctMode,
    legacy_metadata: bool,
    delete_failure: Option<StoreErrorKind>,
    token_page_failure: Option<(usize, StoreErrorKind)>,
    scan_failures: Vec<(Vec<ColumnValue>, StoreErrorKind)>,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            distinct: DistinctMode::Accept,
            legacy_metadata: false,
            delete_failure: None,
            token_page_failure: None,
            scan_failures: Vec::new(),
            state: Mutex::new(State {
                rows: Vec::new(),
                queries: Vec::new(),
                executed: Vec::new(),
                token_pages: 0,
            }),
        }
    }

    pub fn with_distinct(mut self, mode: DistinctMode) -> Self {
        self.distinct = mode;
        self
    }

    /// Only answer the legacy `system.schema_columns` layout.
    pub fn with_legacy_metadata(mut self) -> Self {
        self.legacy_metadata = true;
        self
    }

    /// Fail every delete with `kind`.
    pub fn fail_deletes(mut self, kind: StoreErrorKind) -> Self {
        self.delete_failure = Some(kind);
        self
    }

    /// Answer `pages` token pages, then fail with `kind`.
    pub fn fail_token_pages_after(mut self, pages: usize, kind: StoreErrorKind) -> Self {
        self.token_page_failure = Some((pages, kind));
        self
    }

    /// Fail reads of the partition with key `partition`.
    pub fn fail_scan_of(mut self, partition: Vec<ColumnValue>, kind: StoreErrorKind) -> Self {
        self.scan_failures.push((partition, kind));
        self
    }

    pub fn insert(&mut self, row: MemoryRow) {
        self.lock().rows.push(row);
    }

    pub fn with_row(mut self, row: MemoryRow) -> Self {
        self.insert(row);
        self
    }

    /// A session over this store with default request options.
    pub fn session(self: &std::sync::Arc<Self>) -> StoreSession {
        StoreSession::new(self.clone(), RequestOptions::default())
    }

    /// CQL of every read issued so far.
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    /// Every statement passed to `execute`.
    pub fn executed(&self) -> Vec<Statement> {
        self.lock().executed.clone()
    }

    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn token_of(&self, key: &PartitionKey) -> i64 {
        token(key.values())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn partition_of(&self, row: &MemoryRow) -> Vec<ColumnValue> {
        self.schema
            .partition_key()
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(ColumnValue::Empty))
            .collect()
    }

    /// Rows ordered by partition token, insertion order within a partition.
    fn rows_in_token_order(&self, state: &State) -> Vec<(i64, MemoryRow)> {
        let mut rows: Vec<_> = state
            .rows
            .iter()
            .map(|row| (token(&self.partition_of(row)), row.clone()))
            .collect();
        rows.sort_by_key(|(token, _)| *token);
        rows
    }

    fn key_columns(&self, row: &MemoryRow) -> Vec<(String, Option<ColumnValue>)> {
        self.schema
            .partition_key()
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned()))
            .collect()
    }

    fn token_row(&self, token: i64, row: &MemoryRow) -> Row {
        let mut columns = vec![(
            cql::TOKEN_ALIAS.to_string(),
            Some(ColumnValue::BigInt(token)),
        )];
        columns.extend(self.key_columns(row));
        Row::new(columns)
    }

    fn metadata_rows(&self, statement: &Statement) -> Vec<Row> {
        let keyspace = ColumnValue::from(self.schema.keyspace());
        let table = ColumnValue::from(self.schema.table());
        if statement.values != [keyspace, table] {
            return Vec::new();
        }

        let (kind_column, position_column, clustering) = if self.legacy_metadata {
            ("type", "component_index", "clustering_key")
        } else {
            ("kind", "position", "clustering")
        };
        let describe = |name: &String, kind: &str, position: i32| {
            Row::new(vec![
                ("column_name".to_string(), Some(ColumnValue::from(name.as_str()))),
                (kind_column.to_string(), Some(ColumnValue::from(kind))),
                (position_column.to_string(), Some(ColumnValue::Int(position))),
            ])
        };

        let mut rows = Vec::new();
        // Reported in reverse key order to exercise position sorting.
        for (i, name) in self.schema.partition_key().iter().enumerate().rev() {
            rows.push(describe(name, "partition_key", i as i32));
        }
        for (i, name) in self.schema.clustering_key().iter().enumerate().rev() {
            rows.push(describe(name, clustering, i as i32));
        }
        for name in self.schema.static_columns() {
            rows.push(describe(name, "static", -1));
        }
        for name in self.schema.regular_columns() {
            rows.push(describe(name, "regular", -1));
        }
        rows
    }

    fn distinct_rows(&self, state: &State) -> RowStream {
        let mut keys: Vec<Row> = Vec::new();
        let mut last = None;
        for (token, row) in self.rows_in_token_order(state) {
            if last != Some(token) {
                keys.push(Row::new(self.key_columns(&row)));
                last = Some(token);
            }
        }

        let items: Vec<Result<Row, StoreError>> = match self.distinct {
            DistinctMode::FailAfter(n, kind) => keys
                .into_iter()
                .take(n)
                .map(Ok)
                .chain(std::iter::once(Err(StoreError::new(
                    kind,
                    "DISTINCT scan aborted",
                ))))
                .collect(),
            _ => keys.into_iter().map(Ok).collect(),
        };
        Box::pin(stream::iter(items))
    }

    fn token_page(&self, state: &mut State, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        if let Some((pages, kind)) = self.token_page_failure {
            if state.token_pages >= pages {
                return Err(StoreError::new(kind, "token page failed"));
            }
        }
        state.token_pages += 1;

        let (cursor, limit) = match statement.values.as_slice() {
            [ColumnValue::BigInt(cursor), ColumnValue::Int(limit)] => (*cursor, *limit),
            other => {
                return Err(StoreError::unsupported(format!(
                    "bad token page parameters {other:?}"
                )));
            }
        };

        Ok(self
            .rows_in_token_order(state)
            .into_iter()
            .filter(|(token, _)| *token > cursor)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(token, row)| self.token_row(token, &row))
            .collect())
    }

    fn partition_rows(&self, state: &State, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        let selected = selected_columns(&statement.cql);
        for column in &selected {
            if !self.schema.has_column(column) {
                return Err(StoreError::unsupported(format!(
                    "Undefined column name {column}"
                )));
            }
        }

        let partition = statement.values.as_slice();
        if let Some((_, kind)) = self.scan_failures.iter().find(|(key, _)| key == partition) {
            return Err(StoreError::new(*kind, "partition read timed out"));
        }
        Ok(state
            .rows
            .iter()
            .filter(|row| self.partition_of(row) == partition)
            .map(|row| {
                let mut columns: Vec<_> = selected
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned()))
                    .collect();
                columns.push((
                    cql::WRITETIME_ALIAS.to_string(),
                    row.writetime.map(ColumnValue::BigInt),
                ));
                columns.push((
                    cql::TTL_ALIAS.to_string(),
                    row.ttl.and_then(|t| i32::try_from(t).ok()).map(ColumnValue::Int),
                ));
                Row::new(columns)
            })
            .collect())
    }

    fn delete(&self, state: &mut State, statement: &Statement) -> Result<(), StoreError> {
        if let Some(kind) = self.delete_failure {
            return Err(StoreError::new(kind, "delete rejected"));
        }

        let key_columns: Vec<&String> = self.schema.primary_key().collect();
        if statement.values.len() != key_columns.len() {
            return Err(StoreError::unsupported("incomplete primary key in DELETE"));
        }
        state.rows.retain(|row| {
            !key_columns
                .iter()
                .zip(&statement.values)
                .all(|(column, value)| row.get(column) == Some(value))
        });
        Ok(())
    }
}

#[async_trait]
impl CqlSession for MemoryStore {
    async fn query(&self, statement: &Statement) -> Result<RowStream, StoreError> {
        let mut state = self.lock();
        state.queries.push(statement.cql.clone());

        let cql = statement.cql.as_str();
        let rows = if cql == cql::SCHEMA_COLUMNS {
            if self.legacy_metadata {
                return Err(StoreError::unsupported(
                    "unconfigured table system_schema.columns",
                ));
            }
            self.metadata_rows(statement)
        } else if cql == cql::LEGACY_SCHEMA_COLUMNS {
            self.metadata_rows(statement)
        } else if cql == cql::distinct_partitions(&self.schema) {
            return match self.distinct {
                DistinctMode::Reject(kind) => Err(StoreError::new(
                    kind,
                    "SELECT DISTINCT queries must only request partition key columns",
                )),
                _ => Ok(self.distinct_rows(&state)),
            };
        } else if cql == cql::first_token(&self.schema) {
            self.rows_in_token_order(&state)
                .first()
                .map(|(token, row)| self.token_row(*token, row))
                .into_iter()
                .collect()
        } else if cql == cql::token_page(&self.schema) {
            self.token_page(&mut state, statement)?
        } else if cql.contains(cql::WRITETIME_ALIAS) {
            self.partition_rows(&state, statement)?
        } else {
            return Err(StoreError::unsupported(format!("unrecognised query: {cql}")));
        };

        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }

    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.executed.push(statement.clone());

        if statement.cql == cql::delete_row(&self.schema) {
            self.delete(&mut state, statement)
        } else {
            Err(StoreError::unsupported(format!(
                "unrecognised statement: {}",
                statement.cql
            )))
        }
    }
}

/// Plain column names between `SELECT` and the first `WRITETIME(`.
fn selected_columns(query: &str) -> Vec<String> {
    let list = query
        .strip_prefix("SELECT ")
        .and_then(|rest| rest.split(", WRITETIME(").next())
        .unwrap_or_default();
    list.split(", ")
        .filter(|c| !c.is_empty())
        .map(|c| c.trim_matches('"').replace("\"\"", "\""))
        .collect()
}

/// FNV-1a over the rendered key values.
fn token(values: &[ColumnValue]) -> i64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for value in values {
        for byte in value.to_string().bytes().chain(std::iter::once(0)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash as i64
}
