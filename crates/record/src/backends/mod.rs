//! Query Backend Abstractions
//!
//! The record layer depends on exactly one collaborator: something that can
//! insert, select, update and delete rows given a table name, an equality
//! predicate and a payload. Transaction scopes expose the same surface, so a
//! transaction can be used anywhere a backend can.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::attributes::Attributes;
use crate::error::ModelResult;
use crate::query::{Predicate, Query, QueryKind, QueryOutput, Row};

pub use memory::{MemoryBackend, MemoryTransaction};
pub use postgres::{PostgresBackend, PostgresTransaction};

/// Shared handle to a query backend or transaction scope
pub type BackendHandle = Arc<dyn QueryBackend>;

/// Query-execution backend contract
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Short name used in log output
    fn label(&self) -> &str;

    /// Insert one row and return the stored row(s) with generated columns
    async fn insert(&self, table: &str, payload: &Attributes) -> ModelResult<Vec<Row>>;

    /// Select rows matching `predicate` (`None` or empty: all rows)
    async fn select(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<Vec<Row>>;

    /// Select at most `limit` rows matching `predicate`.
    ///
    /// The default filters after a full select; backends that can push the
    /// cap down should override it.
    async fn select_limit(&self, table: &str, predicate: Option<&Predicate>, limit: u64) -> ModelResult<Vec<Row>> {
        let mut rows = self.select(table, predicate).await?;
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    /// Update rows matching `predicate` and return them as stored
    async fn update(
        &self,
        table: &str,
        payload: &Attributes,
        predicate: Option<&Predicate>,
    ) -> ModelResult<Vec<Row>>;

    /// Delete rows matching `predicate` and return the affected count
    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<u64>;

    /// Run a declarative query descriptor
    async fn execute(&self, query: &Query) -> ModelResult<QueryOutput> {
        let predicate = query.predicate.as_ref();
        let empty = Attributes::new();
        let payload = query.payload.as_ref().unwrap_or(&empty);

        match query.kind {
            QueryKind::Insert => self.insert(&query.table, payload).await.map(QueryOutput::Rows),
            QueryKind::Select => match query.limit {
                Some(limit) => self
                    .select_limit(&query.table, predicate, limit)
                    .await
                    .map(QueryOutput::Rows),
                None => self.select(&query.table, predicate).await.map(QueryOutput::Rows),
            },
            QueryKind::Update => self
                .update(&query.table, payload, predicate)
                .await
                .map(QueryOutput::Rows),
            QueryKind::Delete => self
                .delete(&query.table, predicate)
                .await
                .map(QueryOutput::Affected),
        }
    }
}

/// A transaction obtained from a backend's own transaction API.
///
/// The record layer only ever routes queries through a scope; finishing it
/// is the caller's job.
#[async_trait]
pub trait TransactionScope: QueryBackend {
    /// Make the pending changes durable
    async fn commit(&self) -> ModelResult<()>;

    /// Discard the pending changes
    async fn rollback(&self) -> ModelResult<()>;

    /// Whether the scope can still run queries
    fn is_active(&self) -> bool;

    /// This scope as a plain backend handle, for options and record binding
    fn as_backend(self: Arc<Self>) -> BackendHandle;
}

/// Backend that can open transaction scopes
#[async_trait]
pub trait TransactionalBackend: QueryBackend {
    async fn begin(&self) -> ModelResult<Arc<dyn TransactionScope>>;
}
