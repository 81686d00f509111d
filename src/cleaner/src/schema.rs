//! Table schema introspection.
//!
//! The inspector reads column metadata once per run and classifies every
//! column as partition key, clustering key, static or regular. Key columns
//! are ordered by their declared position. Regular columns keep the order the
//! store reported them in, and the first one becomes the representative
//! column whose `WRITETIME`/`TTL` stands in for the whole row. That order is
//! not guaranteed by the store, so the choice is positional. Static columns
//! belong to the partition rather than the row and are never representative.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cql;
use crate::store::{ColumnValue, Row, StoreError, StoreSession};

/// Column classification as reported by store metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    PartitionKey,
    ClusteringKey,
    Static,
    Regular,
}

impl ColumnKind {
    /// Parse a kind string from either metadata layout.
    ///
    /// Returns `None` for kinds that do not take part in cleanup, such as
    /// `compact_value`.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "partition_key" => Some(Self::PartitionKey),
            "clustering" | "clustering_key" => Some(Self::ClusteringKey),
            "static" => Some(Self::Static),
            "regular" => Some(Self::Regular),
            _ => None,
        }
    }
}

/// Key layout of one table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    keyspace: String,
    table: String,
    partition_key: Vec<String>,
    clustering_key: Vec<String>,
    regular: Vec<String>,
    static_columns: Vec<String>,
}

impl TableSchema {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        partition_key: Vec<String>,
        clustering_key: Vec<String>,
        regular: Vec<String>,
    ) -> Result<Self, SchemaError> {
        let keyspace = keyspace.into();
        let table = table.into();

        if partition_key.is_empty() {
            return Err(SchemaError::NoPartitionKey { keyspace, table });
        }
        if regular.is_empty() {
            return Err(SchemaError::NoRegularColumns { keyspace, table });
        }

        let mut seen = HashSet::new();
        for column in partition_key.iter().chain(&clustering_key).chain(&regular) {
            if !seen.insert(column.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    column: column.clone(),
                });
            }
        }

        Ok(Self {
            keyspace,
            table,
            partition_key,
            clustering_key,
            regular,
            static_columns: Vec::new(),
        })
    }

    /// Add the table's static columns. They can be matched by a predicate
    /// but carry no per-row write metadata.
    pub fn with_static_columns(mut self, columns: Vec<String>) -> Result<Self, SchemaError> {
        for (i, column) in columns.iter().enumerate() {
            if self.has_column(column) || columns[..i].contains(column) {
                return Err(SchemaError::DuplicateColumn {
                    column: column.clone(),
                });
            }
        }
        self.static_columns = columns;
        Ok(self)
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"keyspace"."table"`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            cql::quote_ident(&self.keyspace),
            cql::quote_ident(&self.table)
        )
    }

    pub fn partition_key(&self) -> &[String] {
        &self.partition_key
    }

    pub fn clustering_key(&self) -> &[String] {
        &self.clustering_key
    }

    pub fn regular_columns(&self) -> &[String] {
        &self.regular
    }

    pub fn static_columns(&self) -> &[String] {
        &self.static_columns
    }

    /// Partition key columns followed by clustering key columns.
    pub fn primary_key(&self) -> impl Iterator<Item = &String> {
        self.partition_key.iter().chain(&self.clustering_key)
    }

    /// The column whose write metadata is inspected for every row.
    pub fn representative_column(&self) -> &str {
        // Non-empty by construction.
        &self.regular[0]
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key().any(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.is_key_column(name)
            || self.regular.iter().any(|c| c == name)
            || self.static_columns.iter().any(|c| c == name)
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema metadata: {0}")]
    Query(#[from] StoreError),

    #[error("table {keyspace}.{table} has no partition key columns (missing or malformed table)")]
    NoPartitionKey { keyspace: String, table: String },

    #[error("table {keyspace}.{table} has no regular column to read write metadata from")]
    NoRegularColumns { keyspace: String, table: String },

    #[error("column {column} is reported more than once")]
    DuplicateColumn { column: String },

    #[error("column {column} does not exist in table {table}")]
    UnknownColumn { table: String, column: String },
}

/// Which metadata layout answered the schema query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLayout {
    /// `system_schema.columns` with `kind` and `position`.
    SystemSchema,
    /// `system.schema_columns` with `type` and `component_index`.
    Legacy,
}

impl MetadataLayout {
    fn query(self) -> &'static str {
        match self {
            Self::SystemSchema => cql::SCHEMA_COLUMNS,
            Self::Legacy => cql::LEGACY_SCHEMA_COLUMNS,
        }
    }

    fn kind_column(self) -> &'static str {
        match self {
            Self::SystemSchema => "kind",
            Self::Legacy => "type",
        }
    }

    fn position_column(self) -> &'static str {
        match self {
            Self::SystemSchema => "position",
            Self::Legacy => "component_index",
        }
    }
}

/// Reads table metadata through the session it was built with.
pub struct SchemaInspector {
    session: StoreSession,
}

impl SchemaInspector {
    pub fn new(session: StoreSession) -> Self {
        Self { session }
    }

    /// Look up and classify the columns of `keyspace.table`.
    pub async fn inspect(&self, keyspace: &str, table: &str) -> Result<TableSchema, SchemaError> {
        let (layout, rows) = self.fetch_columns(keyspace, table).await?;
        let schema = classify(keyspace, table, layout, &rows)?;

        info!(
            keyspace = %keyspace,
            table = %table,
            partition_key = ?schema.partition_key(),
            clustering_key = ?schema.clustering_key(),
            representative = %schema.representative_column(),
            "Table schema loaded"
        );

        Ok(schema)
    }

    async fn fetch_columns(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<(MetadataLayout, Vec<Row>), SchemaError> {
        let params = || {
            vec![
                ColumnValue::from(keyspace),
                ColumnValue::from(table),
            ]
        };

        let modern = MetadataLayout::SystemSchema;
        match self.session.query_all(modern.query(), params()).await {
            Ok(rows) => Ok((modern, rows)),
            Err(e) if e.is_connectivity() => Err(e.into()),
            Err(e) => {
                warn!(
                    error = %e,
                    "system_schema.columns unavailable, reading legacy system.schema_columns"
                );
                let legacy = MetadataLayout::Legacy;
                let rows = self.session.query_all(legacy.query(), params()).await?;
                Ok((legacy, rows))
            }
        }
    }
}

/// Turn metadata rows into a schema.
fn classify(
    keyspace: &str,
    table: &str,
    layout: MetadataLayout,
    rows: &[Row],
) -> Result<TableSchema, SchemaError> {
    let mut partition: Vec<(i64, String)> = Vec::new();
    let mut clustering: Vec<(i64, String)> = Vec::new();
    let mut regular: Vec<String> = Vec::new();
    let mut statics: Vec<String> = Vec::new();

    for row in rows {
        let Some(name) = row.get_str("column_name").filter(|n| !n.is_empty()) else {
            continue;
        };
        let kind_str = row.get_str(layout.kind_column()).unwrap_or_default();
        let position = row.get_i64(layout.position_column()).unwrap_or(0);

        match ColumnKind::parse(kind_str) {
            Some(ColumnKind::PartitionKey) => partition.push((position, name.to_string())),
            Some(ColumnKind::ClusteringKey) => clustering.push((position, name.to_string())),
            Some(ColumnKind::Static) => statics.push(name.to_string()),
            Some(ColumnKind::Regular) => regular.push(name.to_string()),
            None => debug!(column = %name, kind = %kind_str, "Ignoring column"),
        }
    }

    // Stable sort keeps metadata order for equal positions.
    partition.sort_by_key(|(position, _)| *position);
    clustering.sort_by_key(|(position, _)| *position);

    TableSchema::new(
        keyspace,
        table,
        partition.into_iter().map(|(_, name)| name).collect(),
        clustering.into_iter().map(|(_, name)| name).collect(),
        regular,
    )?
    .with_static_columns(statics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockCqlSession, RequestOptions, RowStream};
    use futures::stream;
    use std::sync::Arc;

    fn column(name: &str, kind: &str, position: i32) -> Row {
        Row::new(vec![
            ("column_name".to_string(), Some(ColumnValue::from(name))),
            ("kind".to_string(), Some(ColumnValue::from(kind))),
            ("position".to_string(), Some(ColumnValue::Int(position))),
        ])
    }

    fn legacy_column(name: &str, kind: &str, index: Option<i32>) -> Row {
        Row::new(vec![
            ("column_name".to_string(), Some(ColumnValue::from(name))),
            ("type".to_string(), Some(ColumnValue::from(kind))),
            ("component_index".to_string(), index.map(ColumnValue::Int)),
        ])
    }

    fn rows(rows: Vec<Row>) -> RowStream {
        Box::pin(stream::iter(rows.into_iter().map(Ok)))
    }

    #[test]
    fn test_schema_invariants() {
        let err = TableSchema::new("ks", "t", vec![], vec![], vec!["v".into()]).unwrap_err();
        assert!(matches!(err, SchemaError::NoPartitionKey { .. }));

        let err = TableSchema::new("ks", "t", vec!["k".into()], vec![], vec![]).unwrap_err();
        assert!(matches!(err, SchemaError::NoRegularColumns { .. }));

        let err = TableSchema::new("ks", "t", vec!["k".into()], vec!["k".into()], vec!["v".into()])
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));

        let err = TableSchema::new("ks", "t", vec!["k".into()], vec![], vec!["v".into()])
            .unwrap()
            .with_static_columns(vec!["v".into()])
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_classify_orders_keys_by_position() {
        let rows = vec![
            column("payload", "regular", -1),
            column("day", "partition_key", 1),
            column("seq", "clustering", 1),
            column("tenant", "partition_key", 0),
            column("ts", "clustering", 0),
        ];

        let schema = classify("ks", "t", MetadataLayout::SystemSchema, &rows).unwrap();
        assert_eq!(schema.partition_key(), ["tenant", "day"]);
        assert_eq!(schema.clustering_key(), ["ts", "seq"]);
        assert_eq!(schema.regular_columns(), ["payload"]);
        assert_eq!(schema.representative_column(), "payload");
    }

    #[test]
    fn test_static_column_is_never_representative() {
        let rows = vec![
            column("bucket_meta", "static", -1),
            column("event_id", "clustering", 0),
            column("payload", "regular", -1),
            column("user_id", "partition_key", 0),
        ];

        let schema = classify("ks", "t", MetadataLayout::SystemSchema, &rows).unwrap();
        assert_eq!(schema.representative_column(), "payload");
        assert_eq!(schema.regular_columns(), ["payload"]);
        assert_eq!(schema.static_columns(), ["bucket_meta"]);
        assert!(schema.has_column("bucket_meta"));
        assert!(!schema.is_key_column("bucket_meta"));
    }

    #[test]
    fn test_static_only_table_has_no_representative() {
        let rows = vec![
            legacy_column("user_id", "partition_key", None),
            legacy_column("event_id", "clustering_key", Some(0)),
            legacy_column("bucket_meta", "static", None),
        ];

        let err = classify("ks", "t", MetadataLayout::Legacy, &rows).unwrap_err();
        assert!(matches!(err, SchemaError::NoRegularColumns { .. }));
    }

    #[test]
    fn test_classify_legacy_layout() {
        let rows = vec![
            legacy_column("user_id", "partition_key", None),
            legacy_column("event_id", "clustering_key", Some(0)),
            legacy_column("payload", "regular", Some(1)),
            legacy_column("", "compact_value", None),
        ];

        let schema = classify("ks", "t", MetadataLayout::Legacy, &rows).unwrap();
        assert_eq!(schema.partition_key(), ["user_id"]);
        assert_eq!(schema.clustering_key(), ["event_id"]);
        assert_eq!(schema.regular_columns(), ["payload"]);
    }

    #[test]
    fn test_absent_table_has_no_partition_key() {
        let err = classify("ks", "missing", MetadataLayout::SystemSchema, &[]).unwrap_err();
        assert!(matches!(err, SchemaError::NoPartitionKey { .. }));
    }

    #[tokio::test]
    async fn test_inspect_falls_back_to_legacy_metadata() {
        let mut mock = MockCqlSession::new();
        mock.expect_query()
            .withf(|s| s.cql == cql::SCHEMA_COLUMNS)
            .times(1)
            .returning(|_| Err(StoreError::unsupported("unconfigured table columns")));
        mock.expect_query()
            .withf(|s| {
                s.cql == cql::LEGACY_SCHEMA_COLUMNS
                    && s.values == vec![ColumnValue::from("app"), ColumnValue::from("events")]
            })
            .times(1)
            .returning(|_| {
                Ok(rows(vec![
                    legacy_column("user_id", "partition_key", None),
                    legacy_column("payload", "regular", None),
                ]))
            });

        let session = StoreSession::new(Arc::new(mock), RequestOptions::default());
        let schema = SchemaInspector::new(session)
            .inspect("app", "events")
            .await
            .unwrap();
        assert_eq!(schema.partition_key(), ["user_id"]);
    }

    #[tokio::test]
    async fn test_inspect_does_not_mask_connection_errors() {
        let mut mock = MockCqlSession::new();
        mock.expect_query()
            .times(1)
            .returning(|_| Err(StoreError::connection("all hosts down")));

        let session = StoreSession::new(Arc::new(mock), RequestOptions::default());
        let err = SchemaInspector::new(session)
            .inspect("app", "events")
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Query(e) if e.is_connectivity()));
    }
}
