use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::cql;
use crate::scanner::CandidateRow;
use crate::schema::TableSchema;
use crate::store::{ColumnValue, StoreError, StoreSession};

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("failed to delete row {key}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Logged only.
    DryRun,
}

/// Issues row deletes by full primary key.
pub struct Deleter {
    session: StoreSession,
    query: String,
    dry_run: bool,
}

impl Deleter {
    pub fn new(session: StoreSession, schema: Arc<TableSchema>, dry_run: bool) -> Self {
        Self {
            session,
            query: cql::delete_row(&schema),
            dry_run,
        }
    }

    pub async fn delete(&self, row: &CandidateRow) -> Result<DeleteOutcome, DeleteError> {
        let params = row.primary_key().to_vec();

        if self.dry_run {
            debug!(
                cql = %self.query,
                params = %render(&params),
                "[DRY RUN] Would issue DELETE"
            );
            return Ok(DeleteOutcome::DryRun);
        }

        debug!(cql = %self.query, params = %render(&params), "Issuing DELETE");
        let key = render(&params);
        self.session
            .execute(self.query.clone(), params)
            .await
            .map_err(|source| DeleteError::Store { key, source })?;
        Ok(DeleteOutcome::Deleted)
    }
}

fn render(values: &[ColumnValue]) -> String {
    let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", rendered.join(", "))
}
