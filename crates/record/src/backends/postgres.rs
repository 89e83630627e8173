//! PostgreSQL Backend Implementation
//!
//! Runs query descriptors against PostgreSQL through sqlx. Statements come
//! from [`crate::sql::render_typed`] using the column types read from the
//! catalog (cached per table), so string values such as timestamps or UUIDs
//! read back from a row can be written back unchanged. Result rows are
//! converted column by column into JSON values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::types::Json;
use sqlx::{Executor, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BackendHandle, QueryBackend, TransactionScope, TransactionalBackend};
use crate::attributes::Attributes;
use crate::config::DatabaseConfig;
use crate::error::{ModelError, ModelResult};
use crate::query::{Predicate, Query, Row};
use crate::sql::{quote_identifier, render_typed, ColumnTypes, Statement};

const COLUMN_TYPES_SQL: &str = "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped";

/// Per-table column types, shared by a backend and its transactions
#[derive(Clone, Default)]
struct ColumnTypeCache(Arc<RwLock<HashMap<String, Arc<ColumnTypes>>>>);

impl ColumnTypeCache {
    fn get(&self, table: &str) -> Option<Arc<ColumnTypes>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }

    /// Unknown tables come back empty and are not cached
    fn store(&self, table: &str, types: ColumnTypes) -> Arc<ColumnTypes> {
        let types = Arc::new(types);
        if !types.is_empty() {
            self.0
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(table.to_string(), Arc::clone(&types));
        }
        types
    }

    fn clear(&self) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

async fn load_column_types<'e, E>(executor: E, table: &str) -> ModelResult<ColumnTypes>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String, String)> = sqlx::query_as(COLUMN_TYPES_SQL)
        .bind(quote_identifier(table))
        .fetch_all(executor)
        .await?;
    debug!(table, columns = rows.len(), "Loaded column types");
    Ok(rows.into_iter().collect())
}

/// PostgreSQL connection pool implementing [`QueryBackend`]
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    column_types: ColumnTypeCache,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            column_types: ColumnTypeCache::default(),
        }
    }

    /// Validate `config` and open a pool
    pub async fn connect(config: &DatabaseConfig) -> ModelResult<Self> {
        config.validate()?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        if let Some(idle_timeout) = config.idle_timeout_secs {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        let pool = options
            .connect(&config.database_url)
            .await
            .map_err(|e| ModelError::Backend(format!("Failed to create PostgreSQL pool: {}", e)))?;

        debug!(max_connections = config.max_connections, "PostgreSQL pool ready");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn handle(&self) -> BackendHandle {
        Arc::new(self.clone())
    }

    /// Drop cached column types; call after altering tables
    pub fn forget_column_types(&self) {
        self.column_types.clear();
    }

    /// Begin a transaction scope on a pooled connection
    pub async fn begin_transaction(&self) -> ModelResult<Arc<PostgresTransaction>> {
        let tx = self.pool.begin().await?;
        debug!("Beginning PostgreSQL transaction");
        Ok(Arc::new(PostgresTransaction {
            inner: Mutex::new(Some(tx)),
            active: AtomicBool::new(true),
            column_types: self.column_types.clone(),
        }))
    }

    async fn statement(&self, query: &Query) -> ModelResult<Statement> {
        let types = match self.column_types.get(&query.table) {
            Some(types) => types,
            None => self
                .column_types
                .store(&query.table, load_column_types(&self.pool, &query.table).await?),
        };
        Ok(render_typed(query, &types))
    }

    async fn fetch(&self, query: Query) -> ModelResult<Vec<Row>> {
        let statement = self.statement(&query).await?;
        debug!(sql = %statement.sql, "Executing statement");
        let rows = bind_params(sqlx::query(&statement.sql), &statement)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_attributes).collect()
    }
}

#[async_trait]
impl QueryBackend for PostgresBackend {
    fn label(&self) -> &str {
        "postgres"
    }

    async fn insert(&self, table: &str, payload: &Attributes) -> ModelResult<Vec<Row>> {
        self.fetch(Query::insert(table, payload.clone())).await
    }

    async fn select(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<Vec<Row>> {
        self.fetch(Query::select(table, predicate.cloned())).await
    }

    async fn select_limit(&self, table: &str, predicate: Option<&Predicate>, limit: u64) -> ModelResult<Vec<Row>> {
        self.fetch(Query::select(table, predicate.cloned()).limit(limit)).await
    }

    async fn update(
        &self,
        table: &str,
        payload: &Attributes,
        predicate: Option<&Predicate>,
    ) -> ModelResult<Vec<Row>> {
        self.fetch(Query::update(table, payload.clone(), predicate.cloned())).await
    }

    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<u64> {
        let statement = self.statement(&Query::delete(table, predicate.cloned())).await?;
        debug!(sql = %statement.sql, "Executing statement");
        let result = bind_params(sqlx::query(&statement.sql), &statement)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TransactionalBackend for PostgresBackend {
    async fn begin(&self) -> ModelResult<Arc<dyn TransactionScope>> {
        let tx: Arc<dyn TransactionScope> = self.begin_transaction().await?;
        Ok(tx)
    }
}

/// Transaction scope over a single PostgreSQL connection
pub struct PostgresTransaction {
    inner: Mutex<Option<Transaction<'static, Postgres>>>,
    active: AtomicBool,
    column_types: ColumnTypeCache,
}

impl PostgresTransaction {
    fn finished() -> ModelError {
        ModelError::Transaction("PostgreSQL transaction has already finished".to_string())
    }

    /// Column types are read on the transaction's own connection, so tables
    /// created inside the transaction are visible.
    async fn statement(&self, tx: &mut Transaction<'static, Postgres>, query: &Query) -> ModelResult<Statement> {
        let types = match self.column_types.get(&query.table) {
            Some(types) => types,
            None => self
                .column_types
                .store(&query.table, load_column_types(&mut **tx, &query.table).await?),
        };
        Ok(render_typed(query, &types))
    }

    async fn fetch(&self, query: Query) -> ModelResult<Vec<Row>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        let statement = self.statement(tx, &query).await?;
        debug!(sql = %statement.sql, "Executing statement in transaction");
        let rows = bind_params(sqlx::query(&statement.sql), &statement)
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(row_to_attributes).collect()
    }
}

#[async_trait]
impl QueryBackend for PostgresTransaction {
    fn label(&self) -> &str {
        "postgres:tx"
    }

    async fn insert(&self, table: &str, payload: &Attributes) -> ModelResult<Vec<Row>> {
        self.fetch(Query::insert(table, payload.clone())).await
    }

    async fn select(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<Vec<Row>> {
        self.fetch(Query::select(table, predicate.cloned())).await
    }

    async fn select_limit(&self, table: &str, predicate: Option<&Predicate>, limit: u64) -> ModelResult<Vec<Row>> {
        self.fetch(Query::select(table, predicate.cloned()).limit(limit)).await
    }

    async fn update(
        &self,
        table: &str,
        payload: &Attributes,
        predicate: Option<&Predicate>,
    ) -> ModelResult<Vec<Row>> {
        self.fetch(Query::update(table, payload.clone(), predicate.cloned())).await
    }

    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<u64> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;
        let statement = self.statement(tx, &Query::delete(table, predicate.cloned())).await?;
        debug!(sql = %statement.sql, "Executing statement in transaction");
        let result = bind_params(sqlx::query(&statement.sql), &statement)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TransactionScope for PostgresTransaction {
    async fn commit(&self) -> ModelResult<()> {
        let tx = self.inner.lock().await.take().ok_or_else(Self::finished)?;
        self.active.store(false, Ordering::SeqCst);
        tx.commit()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> ModelResult<()> {
        let tx = self.inner.lock().await.take().ok_or_else(Self::finished)?;
        self.active.store(false, Ordering::SeqCst);
        tx.rollback()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to rollback transaction: {}", e)))?;
        debug!("Transaction rolled back");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn as_backend(self: Arc<Self>) -> BackendHandle {
        self
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.active.load(Ordering::SeqCst) {
            // sqlx rolls the connection back in its own Drop
            warn!("Transaction dropped without explicit commit or rollback - this will cause an automatic rollback");
        }
    }
}

fn bind_params<'q>(
    mut query: SqlxQuery<'q, Postgres, PgArguments>,
    statement: &Statement,
) -> SqlxQuery<'q, Postgres, PgArguments> {
    for (value, column_type) in statement.params.iter().zip(&statement.param_types) {
        query = bind_value(query, value, column_type.as_deref());
    }
    query
}

/// Bind one JSON value. Parameters for json/jsonb columns are sent as JSON;
/// everything else is sent in its natural type and converted by the `CAST`
/// around its placeholder.
fn bind_value<'q>(
    query: SqlxQuery<'q, Postgres, PgArguments>,
    value: &Value,
    column_type: Option<&str>,
) -> SqlxQuery<'q, Postgres, PgArguments> {
    if column_type.is_some_and(|t| t == "json" || t == "jsonb") {
        return match value {
            Value::Null => query.bind(None::<Json<Value>>),
            other => query.bind(Json(other.clone())),
        };
    }

    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => query.bind(Json(value.clone())),
    }
}

fn row_to_attributes(row: &PgRow) -> ModelResult<Row> {
    use sqlx::{Column, Row as _};

    let mut attributes = Attributes::new();
    for (index, column) in row.columns().iter().enumerate() {
        attributes.insert(column.name().to_string(), column_value(row, index)?);
    }
    Ok(attributes)
}

fn column_value(row: &PgRow, index: usize) -> ModelResult<Value> {
    use sqlx::{Column, Row as _, TypeInfo, ValueRef};

    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let column = &row.columns()[index];
    let type_name = column.type_info().name();
    let fail = |e: sqlx::Error| {
        ModelError::Backend(format!(
            "Failed to read column '{}' of type {}: {}",
            column.name(),
            type_name,
            e
        ))
    };

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index).map_err(fail)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index).map_err(fail)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index).map_err(fail)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index).map_err(fail)?),
        "FLOAT4" => Value::from(row.try_get::<f32, _>(index).map_err(fail)? as f64),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(index).map_err(fail)?),
        "UUID" => Value::String(row.try_get::<sqlx::types::Uuid, _>(index).map_err(fail)?.to_string()),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)
                .map_err(fail)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(
            row.try_get::<chrono::NaiveDateTime, _>(index)
                .map_err(fail)?
                .to_string(),
        ),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(index).map_err(fail)?.to_string()),
        "TIME" => Value::String(row.try_get::<chrono::NaiveTime, _>(index).map_err(fail)?.to_string()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index).map_err(fail)?,
        _ => Value::String(row.try_get::<String, _>(index).map_err(fail)?),
    };

    Ok(value)
}
