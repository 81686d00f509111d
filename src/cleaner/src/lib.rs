//! Tablecleaner Library
//!
//! Purges rows of one wide-column table whose write metadata breaks a
//! retention rule. Partitions are enumerated with `SELECT DISTINCT`, or by
//! walking the token ring when the store cannot answer that, and each
//! partition's rows are evaluated and deleted by full primary key.

pub mod cleaner;
pub mod cql;
pub mod deleter;
pub mod enumerator;
pub mod keys;
pub mod metrics;
pub mod retention;
pub mod scanner;
pub mod schema;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use cleaner::{CleanupError, CleanupOptions, TableCleaner};
pub use deleter::{DeleteError, DeleteOutcome, Deleter};
pub use enumerator::{EnumerationError, PartitionEnumerator, PrimaryOutcome};
pub use keys::PartitionKey;
pub use metrics::{CleanupMetrics, CleanupReport};
pub use retention::{RetentionRule, RetentionThreshold, SelectivePredicate, Verdict};
pub use scanner::{CandidateRow, RowScanner, ScanError};
pub use schema::{SchemaError, SchemaInspector, TableSchema};
pub use store::{
    ColumnValue, CqlSession, RequestOptions, Row, StoreError, StoreErrorKind, StoreSession,
};
