//! [`CqlSession`] backed by the scylla driver (Cassandra and ScyllaDB).

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::errors::{
    DbError, ExecutionError, NextPageError, NextRowError, PagerExecutionError, PrepareError,
    RequestAttemptError, RequestError,
};
use scylla::statement::Consistency;
use scylla::statement::unprepared::Statement as ScyllaStatement;
use scylla::value::{
    Counter, CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid, CqlValue,
    CqlVarint, Row as ScyllaRow,
};
use tracing::debug;
use uuid::Uuid;

use common::config::{ConsistencyLevel, StoreConfig};

use super::{ColumnValue, CqlSession, Row, RowStream, Statement, StoreError, StoreErrorKind};

/// Store session over a connected scylla driver session.
pub struct ScyllaSession {
    session: Session,
}

impl ScyllaSession {
    /// Connect to the cluster through any of `hosts`.
    pub async fn connect(hosts: &[String], config: &StoreConfig) -> Result<Self, StoreError> {
        debug!(hosts = ?hosts, "Connecting to store");
        let session = SessionBuilder::new()
            .known_nodes(hosts)
            .connection_timeout(config.request_timeout)
            .build()
            .await
            .map_err(|e| StoreError::connection(render_chain(&e)))?;
        Ok(Self { session })
    }
}

#[async_trait]
impl CqlSession for ScyllaSession {
    async fn query(&self, statement: &Statement) -> Result<RowStream, StoreError> {
        let pager = self
            .session
            .query_iter(build_statement(statement), bind_values(&statement.values))
            .await
            .map_err(|e| store_error(classify_pager(&e), &e))?;

        let names: Arc<[String]> = pager
            .column_specs()
            .iter()
            .map(|spec| spec.name().to_string())
            .collect();
        let rows = pager
            .rows_stream::<ScyllaRow>()
            .map_err(|e| StoreError::decode(render_chain(&e)))?;

        Ok(Box::pin(rows.map(move |row| {
            row.map_err(|e| store_error(classify_next_row(&e), &e))
                .and_then(|row| convert_row(&names, row))
        })))
    }

    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        self.session
            .query_unpaged(build_statement(statement), bind_values(&statement.values))
            .await
            .map_err(|e| store_error(classify_execution(&e), &e))?;
        Ok(())
    }
}

fn build_statement(statement: &Statement) -> ScyllaStatement {
    let mut query = ScyllaStatement::new(statement.cql.clone());
    query.set_consistency(consistency(statement.options.consistency));
    query.set_request_timeout(Some(statement.options.request_timeout));
    query.set_page_size(statement.options.page_size);
    query
}

fn consistency(level: ConsistencyLevel) -> Consistency {
    match level {
        ConsistencyLevel::Any => Consistency::Any,
        ConsistencyLevel::One => Consistency::One,
        ConsistencyLevel::Two => Consistency::Two,
        ConsistencyLevel::Three => Consistency::Three,
        ConsistencyLevel::Quorum => Consistency::Quorum,
        ConsistencyLevel::All => Consistency::All,
        ConsistencyLevel::LocalQuorum => Consistency::LocalQuorum,
        ConsistencyLevel::EachQuorum => Consistency::EachQuorum,
        ConsistencyLevel::LocalOne => Consistency::LocalOne,
    }
}

fn convert_row(names: &[String], row: ScyllaRow) -> Result<Row, StoreError> {
    let columns = names
        .iter()
        .cloned()
        .zip(row.columns)
        .map(|(name, value)| Ok::<_, StoreError>((name, convert_optional(value)?)))
        .collect::<Result<_, _>>()?;
    Ok(Row::new(columns))
}

fn bind_values(values: &[ColumnValue]) -> Vec<CqlValue> {
    values.iter().map(to_cql).collect()
}

fn to_cql(value: &ColumnValue) -> CqlValue {
    match value {
        ColumnValue::Text(v) => CqlValue::Text(v.clone()),
        ColumnValue::Boolean(v) => CqlValue::Boolean(*v),
        ColumnValue::TinyInt(v) => CqlValue::TinyInt(*v),
        ColumnValue::SmallInt(v) => CqlValue::SmallInt(*v),
        ColumnValue::Int(v) => CqlValue::Int(*v),
        ColumnValue::BigInt(v) => CqlValue::BigInt(*v),
        ColumnValue::Counter(v) => CqlValue::Counter(Counter(*v)),
        ColumnValue::Float(v) => CqlValue::Float(*v),
        ColumnValue::Double(v) => CqlValue::Double(*v),
        ColumnValue::Timestamp(v) => CqlValue::Timestamp(CqlTimestamp(*v)),
        ColumnValue::Date(v) => CqlValue::Date(CqlDate(*v)),
        ColumnValue::Time(v) => CqlValue::Time(CqlTime(*v)),
        ColumnValue::Uuid(v) => CqlValue::Uuid(*v),
        ColumnValue::TimeUuid(v) => CqlValue::Timeuuid(CqlTimeuuid::from(*v)),
        ColumnValue::Inet(v) => CqlValue::Inet(*v),
        ColumnValue::Blob(v) => CqlValue::Blob(v.clone()),
        ColumnValue::Varint(v) => CqlValue::Varint(CqlVarint::from_signed_bytes_be_slice(v)),
        ColumnValue::Decimal { unscaled, scale } => CqlValue::Decimal(
            CqlDecimal::from_signed_be_bytes_slice_and_exponent(unscaled, *scale),
        ),
        ColumnValue::Duration {
            months,
            days,
            nanoseconds,
        } => CqlValue::Duration(CqlDuration {
            months: *months,
            days: *days,
            nanoseconds: *nanoseconds,
        }),
        ColumnValue::Empty => CqlValue::Empty,
        ColumnValue::List(v) => CqlValue::List(v.iter().map(to_cql).collect()),
        ColumnValue::Set(v) => CqlValue::Set(v.iter().map(to_cql).collect()),
        ColumnValue::Vector(v) => CqlValue::Vector(v.iter().map(to_cql).collect()),
        ColumnValue::Map(entries) => CqlValue::Map(
            entries
                .iter()
                .map(|(key, value)| (to_cql(key), to_cql(value)))
                .collect(),
        ),
        ColumnValue::Tuple(v) => {
            CqlValue::Tuple(v.iter().map(|item| item.as_ref().map(to_cql)).collect())
        }
        ColumnValue::Udt {
            keyspace,
            name,
            fields,
        } => CqlValue::UserDefinedType {
            keyspace: keyspace.clone(),
            name: name.clone(),
            fields: fields
                .iter()
                .map(|(field, value)| (field.clone(), value.as_ref().map(to_cql)))
                .collect(),
        },
    }
}

fn convert_all(values: Vec<CqlValue>) -> Result<Vec<ColumnValue>, StoreError> {
    values.into_iter().map(ColumnValue::try_from).collect()
}

fn convert_optional(value: Option<CqlValue>) -> Result<Option<ColumnValue>, StoreError> {
    value.map(ColumnValue::try_from).transpose()
}

impl TryFrom<CqlValue> for ColumnValue {
    type Error = StoreError;

    fn try_from(value: CqlValue) -> Result<Self, Self::Error> {
        Ok(match value {
            CqlValue::Ascii(v) | CqlValue::Text(v) => Self::Text(v),
            CqlValue::Boolean(v) => Self::Boolean(v),
            CqlValue::TinyInt(v) => Self::TinyInt(v),
            CqlValue::SmallInt(v) => Self::SmallInt(v),
            CqlValue::Int(v) => Self::Int(v),
            CqlValue::BigInt(v) => Self::BigInt(v),
            CqlValue::Counter(Counter(v)) => Self::Counter(v),
            CqlValue::Float(v) => Self::Float(v),
            CqlValue::Double(v) => Self::Double(v),
            CqlValue::Timestamp(CqlTimestamp(v)) => Self::Timestamp(v),
            CqlValue::Date(CqlDate(v)) => Self::Date(v),
            CqlValue::Time(CqlTime(v)) => Self::Time(v),
            CqlValue::Uuid(v) => Self::Uuid(v),
            CqlValue::Timeuuid(v) => Self::TimeUuid(Uuid::from(v)),
            CqlValue::Inet(v) => Self::Inet(v),
            CqlValue::Blob(v) => Self::Blob(v),
            CqlValue::Varint(v) => Self::Varint(v.into_signed_bytes_be()),
            CqlValue::Decimal(v) => {
                let (unscaled, scale) = v.into_signed_be_bytes_and_exponent();
                Self::Decimal { unscaled, scale }
            }
            CqlValue::Duration(v) => Self::Duration {
                months: v.months,
                days: v.days,
                nanoseconds: v.nanoseconds,
            },
            CqlValue::Empty => Self::Empty,
            CqlValue::List(v) => Self::List(convert_all(v)?),
            CqlValue::Set(v) => Self::Set(convert_all(v)?),
            CqlValue::Vector(v) => Self::Vector(convert_all(v)?),
            CqlValue::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| {
                        Ok::<_, StoreError>((Self::try_from(key)?, Self::try_from(value)?))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            CqlValue::Tuple(v) => Self::Tuple(
                v.into_iter()
                    .map(convert_optional)
                    .collect::<Result<_, _>>()?,
            ),
            CqlValue::UserDefinedType {
                keyspace,
                name,
                fields,
            } => Self::Udt {
                keyspace,
                name,
                fields: fields
                    .into_iter()
                    .map(|(field, value)| {
                        Ok::<_, StoreError>((field, convert_optional(value)?))
                    })
                    .collect::<Result<_, _>>()?,
            },
            other => {
                return Err(StoreError::decode(format!(
                    "unsupported CQL value {other:?}"
                )));
            }
        })
    }
}

fn store_error(kind: StoreErrorKind, err: &(dyn Error + 'static)) -> StoreError {
    StoreError::new(kind, render_chain(err))
}

fn render_chain(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn classify_execution(err: &ExecutionError) -> StoreErrorKind {
    match err {
        ExecutionError::RequestTimeout(_) => StoreErrorKind::Timeout,
        ExecutionError::EmptyPlan | ExecutionError::ConnectionPoolError(_) => {
            StoreErrorKind::Connection
        }
        ExecutionError::LastAttemptError(attempt) => classify_attempt(attempt),
        ExecutionError::PrepareError(prepare) => classify_prepare(prepare),
        ExecutionError::BadQuery(_) => StoreErrorKind::Unsupported,
        _ => StoreErrorKind::Server,
    }
}

fn classify_pager(err: &PagerExecutionError) -> StoreErrorKind {
    match err {
        PagerExecutionError::PrepareError(prepare) => classify_prepare(prepare),
        PagerExecutionError::SerializationError(_) => StoreErrorKind::Unsupported,
        PagerExecutionError::NextPageError(page) => classify_next_page(page),
        _ => StoreErrorKind::Server,
    }
}

fn classify_next_row(err: &NextRowError) -> StoreErrorKind {
    match err {
        NextRowError::NextPageError(page) => classify_next_page(page),
        NextRowError::RowDeserializationError(_) => StoreErrorKind::Decode,
        _ => StoreErrorKind::Server,
    }
}

fn classify_next_page(err: &NextPageError) -> StoreErrorKind {
    match err {
        NextPageError::RequestFailure(request) => classify_request(request),
        NextPageError::ResultMetadataParseError(_) | NextPageError::TypeCheckError(_) => {
            StoreErrorKind::Decode
        }
        _ => StoreErrorKind::Server,
    }
}

fn classify_request(err: &RequestError) -> StoreErrorKind {
    match err {
        RequestError::RequestTimeout(_) => StoreErrorKind::Timeout,
        RequestError::EmptyPlan | RequestError::ConnectionPoolError(_) => {
            StoreErrorKind::Connection
        }
        RequestError::LastAttemptError(attempt) => classify_attempt(attempt),
        _ => StoreErrorKind::Server,
    }
}

fn classify_prepare(err: &PrepareError) -> StoreErrorKind {
    match err {
        PrepareError::ConnectionPoolError(_) => StoreErrorKind::Connection,
        PrepareError::AllAttemptsFailed { first_attempt } => classify_attempt(first_attempt),
        _ => StoreErrorKind::Server,
    }
}

fn classify_attempt(err: &RequestAttemptError) -> StoreErrorKind {
    match err {
        RequestAttemptError::DbError(db, _) => classify_db(db),
        RequestAttemptError::BrokenConnectionError(_) => StoreErrorKind::Connection,
        RequestAttemptError::SerializationError(_)
        | RequestAttemptError::CqlRequestSerialization(_) => StoreErrorKind::Unsupported,
        RequestAttemptError::CqlResultParseError(_)
        | RequestAttemptError::CqlErrorParseError(_)
        | RequestAttemptError::BodyExtensionsParseError(_) => StoreErrorKind::Decode,
        _ => StoreErrorKind::Server,
    }
}

/// Server-reported errors never mean the client lost its connection.
fn classify_db(err: &DbError) -> StoreErrorKind {
    match err {
        DbError::ReadTimeout { .. } | DbError::WriteTimeout { .. } => StoreErrorKind::Timeout,
        DbError::SyntaxError
        | DbError::Invalid
        | DbError::Unauthorized
        | DbError::ConfigError
        | DbError::AlreadyExists { .. } => StoreErrorKind::Unsupported,
        _ => StoreErrorKind::Server,
    }
}
