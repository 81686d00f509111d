//! CQL text for every statement the cleaner issues.
//!
//! Identifiers are always double-quoted so that case-sensitive names read
//! from schema metadata are addressed exactly. Values are never inlined;
//! every statement uses positional bind markers.

use crate::schema::TableSchema;

/// Alias of the partition token column in enumeration queries.
pub const TOKEN_ALIAS: &str = "cleaner_token";

/// Alias of `WRITETIME(<representative>)` in partition scans.
pub const WRITETIME_ALIAS: &str = "cleaner_writetime";

/// Alias of `TTL(<representative>)` in partition scans.
pub const TTL_ALIAS: &str = "cleaner_ttl";

/// Column metadata on stores with the `system_schema` keyspace.
pub const SCHEMA_COLUMNS: &str = "SELECT column_name, kind, position FROM system_schema.columns \
     WHERE keyspace_name = ? AND table_name = ?";

/// Column metadata on legacy stores.
pub const LEGACY_SCHEMA_COLUMNS: &str = "SELECT column_name, type, component_index \
     FROM system.schema_columns WHERE keyspace_name = ? AND columnfamily_name = ?";

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
    columns
        .into_iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn equality_clause<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
    columns
        .into_iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn token_expr(schema: &TableSchema) -> String {
    format!("token({})", column_list(schema.partition_key()))
}

/// `SELECT DISTINCT` over the partition key.
pub fn distinct_partitions(schema: &TableSchema) -> String {
    format!(
        "SELECT DISTINCT {} FROM {}",
        column_list(schema.partition_key()),
        schema.qualified_name()
    )
}

/// Single-row probe that seeds the token walk.
pub fn first_token(schema: &TableSchema) -> String {
    format!(
        "SELECT {} AS {TOKEN_ALIAS}, {} FROM {} LIMIT 1",
        token_expr(schema),
        column_list(schema.partition_key()),
        schema.qualified_name()
    )
}

/// One page of the token walk. Binds: cursor token, page size.
pub fn token_page(schema: &TableSchema) -> String {
    let token = token_expr(schema);
    format!(
        "SELECT {token} AS {TOKEN_ALIAS}, {} FROM {} WHERE {token} > ? LIMIT ?",
        column_list(schema.partition_key()),
        schema.qualified_name()
    )
}

/// All rows of one partition with the representative column's write metadata.
///
/// `extra` columns are selected as well unless they are already key columns.
/// Binds: partition key values in key order.
pub fn partition_rows(schema: &TableSchema, extra: &[String]) -> String {
    let mut columns: Vec<&String> = schema
        .partition_key()
        .iter()
        .chain(schema.clustering_key())
        .collect();
    for column in extra {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    let representative = quote_ident(schema.representative_column());
    format!(
        "SELECT {}, WRITETIME({representative}) AS {WRITETIME_ALIAS}, \
         TTL({representative}) AS {TTL_ALIAS} FROM {} WHERE {}",
        column_list(columns),
        schema.qualified_name(),
        equality_clause(schema.partition_key())
    )
}

/// Row delete by full primary key. Binds: partition then clustering values.
pub fn delete_row(schema: &TableSchema) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        schema.qualified_name(),
        equality_clause(schema.primary_key())
    )
}
