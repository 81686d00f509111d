//! Partition enumeration.
//!
//! The enumerator first asks the store for `SELECT DISTINCT` over the
//! partition key. Stores that reject that query, or that time out on large
//! tables, are walked instead in token order: a one-row probe seeds a cursor
//! and every following page asks for rows whose token is greater than the
//! cursor. The walk reads rows, not partitions, so rows sharing the cursor's
//! token are folded into the partition already produced.
//!
//! Partitions produced by the primary query before it failed are not
//! retracted when the walk takes over. Callers that need each partition
//! exactly once deduplicate.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cql;
use crate::keys::PartitionKey;
use crate::schema::TableSchema;
use crate::store::{ColumnValue, Row, RowStream, StoreError, StoreSession};

/// Default number of rows requested per token page.
pub const DEFAULT_FALLBACK_PAGE_SIZE: i32 = 20;

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("lost connectivity while enumerating partitions")]
    Connectivity(#[source] StoreError),
}

/// Result of attempting the `SELECT DISTINCT` strategy.
pub enum PrimaryOutcome {
    /// The store accepted the query; partitions stream from it.
    Rows(RowStream),
    /// The store refused or could not answer; use the token walk.
    Unsupported(StoreError),
}

enum State {
    Start,
    Primary(RowStream),
    Fallback(TokenWalk),
    Done,
}

#[derive(Default)]
struct TokenWalk {
    /// Token of the last partition produced. `None` until the probe ran.
    cursor: Option<i64>,
    pending: VecDeque<PartitionKey>,
    finished: bool,
}

/// Lazily produces every partition key of one table.
pub struct PartitionEnumerator {
    session: StoreSession,
    schema: Arc<TableSchema>,
    page_size: i32,
    state: State,
    fallback_engaged: bool,
    truncated: bool,
}

impl PartitionEnumerator {
    pub fn new(session: StoreSession, schema: Arc<TableSchema>) -> Self {
        Self {
            session,
            schema,
            page_size: DEFAULT_FALLBACK_PAGE_SIZE,
            state: State::Start,
            fallback_engaged: false,
            truncated: false,
        }
    }

    /// Rows requested per token page. Values below 1 are raised to 1.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Whether the token walk was used.
    pub fn fallback_engaged(&self) -> bool {
        self.fallback_engaged
    }

    /// Whether the token walk stopped on an error before reaching the end.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Next partition key, or `None` once the table is exhausted.
    pub async fn next_partition(&mut self) -> Option<Result<PartitionKey, EnumerationError>> {
        loop {
            match mem::replace(&mut self.state, State::Done) {
                State::Start => match self.select_primary().await {
                    Ok(PrimaryOutcome::Rows(rows)) => self.state = State::Primary(rows),
                    Ok(PrimaryOutcome::Unsupported(err)) => self.engage_fallback(&err),
                    Err(err) => return Some(Err(err)),
                },
                State::Primary(mut rows) => match rows.next().await {
                    Some(Ok(row)) => {
                        self.state = State::Primary(rows);
                        if let Some(key) = self.key_from(&row) {
                            return Some(Ok(key));
                        }
                    }
                    Some(Err(err)) if err.is_connectivity() => {
                        return Some(Err(EnumerationError::Connectivity(err)));
                    }
                    Some(Err(err)) => self.engage_fallback(&err),
                    None => return None,
                },
                State::Fallback(mut walk) => {
                    if let Some(key) = walk.pending.pop_front() {
                        self.state = State::Fallback(walk);
                        return Some(Ok(key));
                    }
                    if walk.finished {
                        return None;
                    }
                    match self.advance(&mut walk).await {
                        Ok(()) => self.state = State::Fallback(walk),
                        Err(err) => {
                            error!(
                                error = %err,
                                cursor = ?walk.cursor,
                                "Token-range enumeration failed, remaining partitions are skipped"
                            );
                            self.truncated = true;
                            return None;
                        }
                    }
                }
                State::Done => return None,
            }
        }
    }

    /// Consume the enumerator as a stream of keys.
    pub fn into_stream(self) -> impl Stream<Item = Result<PartitionKey, EnumerationError>> {
        stream::unfold(self, |mut enumerator| async move {
            enumerator
                .next_partition()
                .await
                .map(|item| (item, enumerator))
        })
    }

    /// Pick the enumeration strategy.
    pub async fn select_primary(&self) -> Result<PrimaryOutcome, EnumerationError> {
        let query = cql::distinct_partitions(&self.schema);
        debug!(cql = %query, "Enumerating partitions with SELECT DISTINCT");

        match self.session.query(query, Vec::new()).await {
            Ok(rows) => Ok(PrimaryOutcome::Rows(rows)),
            Err(err) if err.is_connectivity() => Err(EnumerationError::Connectivity(err)),
            Err(err) => Ok(PrimaryOutcome::Unsupported(err)),
        }
    }

    fn engage_fallback(&mut self, err: &StoreError) {
        error!(error = %err, "SELECT DISTINCT over the partition key failed");
        info!(
            "This is expected on older store versions or on large tables; \
             continuing with token-range pagination"
        );
        self.fallback_engaged = true;
        self.state = State::Fallback(TokenWalk::default());
    }

    fn key_from(&self, row: &Row) -> Option<PartitionKey> {
        let key = PartitionKey::from_row(row, self.schema.partition_key());
        if key.is_none() {
            warn!("Skipping enumeration row with a null partition key column");
        }
        key
    }

    /// Run the probe or fetch the next page into `walk.pending`.
    async fn advance(&self, walk: &mut TokenWalk) -> Result<(), StoreError> {
        let Some(cursor) = walk.cursor else {
            return self.probe(walk).await;
        };

        let rows = self
            .session
            .query_all(
                cql::token_page(&self.schema),
                vec![ColumnValue::BigInt(cursor), ColumnValue::Int(self.page_size)],
            )
            .await?;
        debug!(cursor, rows = rows.len(), "Fetched token page");

        if rows.is_empty() {
            walk.finished = true;
            return Ok(());
        }

        let mut last = cursor;
        for row in &rows {
            let token = row_token(row)?;
            if token < last {
                warn!(
                    cursor = last,
                    token, "Token page went backwards, stopping enumeration"
                );
                walk.finished = true;
                break;
            }
            if token == last {
                continue;
            }
            last = token;
            if let Some(key) = self.key_from(row) {
                walk.pending.push_back(key);
            }
        }

        if last == cursor && !walk.finished {
            warn!(cursor, "Token page did not advance the cursor, stopping enumeration");
            walk.finished = true;
        }
        walk.cursor = Some(last);
        Ok(())
    }

    async fn probe(&self, walk: &mut TokenWalk) -> Result<(), StoreError> {
        let rows = self
            .session
            .query_all(cql::first_token(&self.schema), Vec::new())
            .await?;

        let Some(row) = rows.first() else {
            debug!("Token probe returned no rows, table is empty");
            walk.finished = true;
            return Ok(());
        };

        let token = row_token(row)?;
        debug!(token, "Token walk seeded");
        walk.cursor = Some(token);
        walk.pending.extend(self.key_from(row));
        Ok(())
    }
}

fn row_token(row: &Row) -> Result<i64, StoreError> {
    row.get_i64(cql::TOKEN_ALIAS)
        .ok_or_else(|| StoreError::decode(format!("row without {} column", cql::TOKEN_ALIAS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RequestOptions, StoreErrorKind};
    use crate::testing::{DistinctMode, MemoryRow, MemoryStore};
    use futures::TryStreamExt;
    use std::collections::HashSet;

    fn schema() -> TableSchema {
        TableSchema::new(
            "app",
            "events",
            vec!["user_id".into()],
            vec!["event_id".into()],
            vec!["payload".into()],
        )
        .unwrap()
    }

    /// `partitions` partitions with `rows_each` rows apiece.
    fn store(partitions: i32, rows_each: i32) -> MemoryStore {
        let mut store = MemoryStore::new(schema());
        for user in 0..partitions {
            for event in 0..rows_each {
                store.insert(
                    MemoryRow::new()
                        .column("user_id", user)
                        .column("event_id", event)
                        .column("payload", "x")
                        .ttl(60),
                );
            }
        }
        store
    }

    fn enumerator(store: &Arc<MemoryStore>) -> PartitionEnumerator {
        PartitionEnumerator::new(
            StoreSession::new(store.clone(), RequestOptions::default()),
            Arc::new(schema()),
        )
    }

    async fn drain(enumerator: &mut PartitionEnumerator) -> Vec<PartitionKey> {
        let mut keys = Vec::new();
        while let Some(key) = enumerator.next_partition().await {
            keys.push(key.unwrap());
        }
        keys
    }

    #[tokio::test]
    async fn test_primary_yields_each_partition() {
        let store = Arc::new(store(7, 3));
        let mut enumerator = enumerator(&store);

        let keys = drain(&mut enumerator).await;
        assert_eq!(keys.len(), 7);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 7);
        assert!(!enumerator.fallback_engaged());
        assert!(store.queries().iter().all(|q| !q.contains("token(")));
    }

    #[tokio::test]
    async fn test_fallback_yields_each_partition_once_in_token_order() {
        let store = Arc::new(
            store(45, 4).with_distinct(DistinctMode::Reject(StoreErrorKind::Unsupported)),
        );
        let mut enumerator = enumerator(&store);

        let keys = drain(&mut enumerator).await;
        assert!(enumerator.fallback_engaged());
        assert!(!enumerator.truncated());
        assert_eq!(keys.len(), 45);

        let tokens: Vec<i64> = keys.iter().map(|k| store.token_of(k)).collect();
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));

        let pages = store
            .queries()
            .iter()
            .filter(|q| q.contains("> ? LIMIT ?"))
            .count();
        assert!(pages >= 45 * 4 / DEFAULT_FALLBACK_PAGE_SIZE as usize);
    }

    #[tokio::test]
    async fn test_partition_larger_than_page_is_produced_once() {
        let store = Arc::new(
            store(3, 50).with_distinct(DistinctMode::Reject(StoreErrorKind::Unsupported)),
        );
        let mut enumerator = enumerator(&store);

        let keys = drain(&mut enumerator).await;
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_midstream_switches_to_fallback() {
        let store = Arc::new(
            store(10, 1).with_distinct(DistinctMode::FailAfter(4, StoreErrorKind::Timeout)),
        );
        let mut enumerator = enumerator(&store);

        let keys = drain(&mut enumerator).await;
        assert!(enumerator.fallback_engaged());
        // Partial primary output is kept; the walk then covers everything.
        assert_eq!(keys.len(), 14);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 10);
    }

    #[tokio::test]
    async fn test_connection_error_is_not_masked() {
        let store = Arc::new(
            store(5, 1).with_distinct(DistinctMode::Reject(StoreErrorKind::Connection)),
        );
        let mut enumerator = enumerator(&store);

        let first = enumerator.next_partition().await;
        assert!(matches!(first, Some(Err(EnumerationError::Connectivity(_)))));
        assert!(enumerator.next_partition().await.is_none());
        assert!(!enumerator.fallback_engaged());
    }

    #[tokio::test]
    async fn test_empty_table_yields_nothing() {
        for mode in [
            DistinctMode::Accept,
            DistinctMode::Reject(StoreErrorKind::Server),
        ] {
            let store = Arc::new(MemoryStore::new(schema()).with_distinct(mode));
            let keys: Vec<_> = enumerator(&store).into_stream().try_collect().await.unwrap();
            assert!(keys.is_empty());
        }
    }

    #[tokio::test]
    async fn test_fallback_failure_truncates() {
        let store = Arc::new(
            store(30, 1)
                .with_distinct(DistinctMode::Reject(StoreErrorKind::Unsupported))
                .fail_token_pages_after(1, StoreErrorKind::Timeout),
        );
        let mut enumerator = enumerator(&store).with_page_size(10);

        let keys = drain(&mut enumerator).await;
        // Probe plus one page of ten.
        assert_eq!(keys.len(), 11);
        assert!(enumerator.truncated());
    }
}
