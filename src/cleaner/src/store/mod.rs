//! Capability interface to the wide-column store.
//!
//! Every component talks to the store through [`StoreSession`], which wraps a
//! [`CqlSession`] implementation together with the request options applied
//! to every statement (consistency, timeout, page size). The production
//! implementation lives in [`scylla`]; tests use an in-memory table.

pub mod scylla;
pub mod value;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use thiserror::Error;

use common::config::{ConsistencyLevel, StoreConfig};

pub use value::ColumnValue;

/// Options attached to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub consistency: ConsistencyLevel,
    pub request_timeout: Duration,
    pub page_size: i32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RequestOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            consistency: config.consistency,
            request_timeout: config.request_timeout,
            page_size: config.page_size,
        }
    }
}

/// A CQL statement with positional bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub cql: String,
    pub values: Vec<ColumnValue>,
    pub options: RequestOptions,
}

/// A result row with named-column access. `None` marks a CQL null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Option<ColumnValue>)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Option<ColumnValue>)>) -> Self {
        Self { columns }
    }

    /// Value of `name`, or `None` when the column is null or not selected.
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ColumnValue::as_i64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ColumnValue::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, Option<&ColumnValue>)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }
}

/// Rows streamed page by page; an error may surface after rows were produced.
pub type RowStream = BoxStream<'static, Result<Row, StoreError>>;

/// Coarse classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The coordinator or a replica timed out.
    Timeout,
    /// The statement was rejected as invalid or unsupported.
    Unsupported,
    /// No connection to the cluster could be used.
    Connection,
    /// Any other server-side error.
    Server,
    /// A response could not be decoded into rows.
    Decode,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::Connection => "connection",
            Self::Server => "server",
            Self::Decode => "decode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unsupported, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Server, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Decode, message)
    }

    /// Connectivity failures must never be papered over by a fallback.
    pub fn is_connectivity(&self) -> bool {
        self.kind == StoreErrorKind::Connection
    }
}

/// The one capability the cleaner needs from a store client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Run a read and stream its rows, paging with `options.page_size`.
    async fn query(&self, statement: &Statement) -> Result<RowStream, StoreError>;

    /// Run a statement whose result rows are not needed.
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError>;
}

/// Session handle passed to every component.
#[derive(Clone)]
pub struct StoreSession {
    inner: Arc<dyn CqlSession>,
    options: RequestOptions,
}

impl fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSession")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl StoreSession {
    pub fn new(inner: Arc<dyn CqlSession>, options: RequestOptions) -> Self {
        Self { inner, options }
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn statement(&self, cql: impl Into<String>, values: Vec<ColumnValue>) -> Statement {
        Statement {
            cql: cql.into(),
            values,
            options: self.options,
        }
    }

    pub async fn query(
        &self,
        cql: impl Into<String>,
        values: Vec<ColumnValue>,
    ) -> Result<RowStream, StoreError> {
        let statement = self.statement(cql, values);
        self.inner.query(&statement).await
    }

    /// Run a read and collect every row, for bounded results only.
    pub async fn query_all(
        &self,
        cql: impl Into<String>,
        values: Vec<ColumnValue>,
    ) -> Result<Vec<Row>, StoreError> {
        self.query(cql, values).await?.try_collect().await
    }

    pub async fn execute(
        &self,
        cql: impl Into<String>,
        values: Vec<ColumnValue>,
    ) -> Result<(), StoreError> {
        let statement = self.statement(cql, values);
        self.inner.execute(&statement).await
    }
}
