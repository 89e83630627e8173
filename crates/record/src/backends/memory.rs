//! In-memory backend
//!
//! Tables live in process memory behind an async mutex. Inserted rows get a
//! sequential integer primary key and `created_at`/`updated_at` timestamps
//! unless the payload supplies them; updates refresh `updated_at`.
//!
//! Transactions work on a snapshot of all tables. Commit replaces the shared
//! tables with the snapshot, rollback drops it; concurrent writers outside
//! the transaction are overwritten on commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BackendHandle, QueryBackend, TransactionScope, TransactionalBackend};
use crate::attributes::Attributes;
use crate::error::{ModelError, ModelResult};
use crate::query::{Predicate, Row};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    last_id: i64,
}

#[derive(Debug, Clone)]
struct TableStore {
    tables: HashMap<String, Table>,
    primary_key: String,
    timestamps: bool,
}

impl TableStore {
    fn new(primary_key: String, timestamps: bool) -> Self {
        Self {
            tables: HashMap::new(),
            primary_key,
            timestamps,
        }
    }

    fn insert(&mut self, table: &str, payload: &Attributes) -> Row {
        let primary_key = self.primary_key.clone();
        let timestamps = self.timestamps;
        let entry = self.tables.entry(table.to_string()).or_default();
        let mut row = payload.clone();

        match row.get(&primary_key).and_then(Value::as_i64) {
            Some(explicit) => entry.last_id = entry.last_id.max(explicit),
            None if row.get(&primary_key).map_or(true, Value::is_null) => {
                entry.last_id += 1;
                row.insert(primary_key, Value::from(entry.last_id));
            }
            None => {}
        }

        if timestamps {
            let now = now_rfc3339();
            for column in ["created_at", "updated_at"] {
                if row.get(column).map_or(true, Value::is_null) {
                    row.insert(column.to_string(), Value::String(now.clone()));
                }
            }
        }

        entry.rows.push(row.clone());
        row
    }

    fn select(&self, table: &str, predicate: Option<&Predicate>, limit: Option<u64>) -> Vec<Row> {
        let limit = limit.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        self.tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| matches(predicate, row))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn update(&mut self, table: &str, payload: &Attributes, predicate: Option<&Predicate>) -> Vec<Row> {
        let touch = self.timestamps && !payload.contains_key("updated_at");
        let now = now_rfc3339();
        let Some(entry) = self.tables.get_mut(table) else {
            return Vec::new();
        };

        let mut updated = Vec::new();
        for row in entry.rows.iter_mut().filter(|row| matches(predicate, row)) {
            for (column, value) in payload {
                row.insert(column.clone(), value.clone());
            }
            if touch {
                row.insert("updated_at".to_string(), Value::String(now.clone()));
            }
            updated.push(row.clone());
        }
        updated
    }

    fn delete(&mut self, table: &str, predicate: Option<&Predicate>) -> u64 {
        let Some(entry) = self.tables.get_mut(table) else {
            return 0;
        };
        let before = entry.rows.len();
        entry.rows.retain(|row| !matches(predicate, row));
        (before - entry.rows.len()) as u64
    }
}

fn matches(predicate: Option<&Predicate>, row: &Row) -> bool {
    predicate.map_or(true, |p| p.matches(row))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// In-process table store implementing [`QueryBackend`]
#[derive(Clone)]
pub struct MemoryBackend {
    label: String,
    store: Arc<Mutex<TableStore>>,
}

impl MemoryBackend {
    /// Backend with an `id` primary key and automatic timestamps
    pub fn new() -> Self {
        Self::with_options("memory", "id", true)
    }

    /// Backend with a custom label, primary key column and timestamp policy
    pub fn with_options(label: impl Into<String>, primary_key: impl Into<String>, timestamps: bool) -> Self {
        Self {
            label: label.into(),
            store: Arc::new(Mutex::new(TableStore::new(primary_key.into(), timestamps))),
        }
    }

    /// Same store, different label; useful to tell handles apart in logs
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Shared handle to this backend
    pub fn handle(&self) -> BackendHandle {
        Arc::new(self.clone())
    }

    /// Number of rows currently stored in `table`
    pub async fn row_count(&self, table: &str) -> usize {
        self.store
            .lock()
            .await
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Drop every table
    pub async fn truncate_all(&self) {
        self.store.lock().await.tables.clear();
    }

    /// Open a snapshot transaction over this backend's tables
    pub async fn begin_transaction(&self) -> Arc<MemoryTransaction> {
        let snapshot = self.store.lock().await.clone();
        debug!(backend = %self.label, "Beginning in-memory transaction");
        Arc::new(MemoryTransaction {
            label: format!("{}:tx", self.label),
            parent: Arc::clone(&self.store),
            working: Mutex::new(Some(snapshot)),
            active: AtomicBool::new(true),
        })
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn insert(&self, table: &str, payload: &Attributes) -> ModelResult<Vec<Row>> {
        Ok(vec![self.store.lock().await.insert(table, payload)])
    }

    async fn select(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<Vec<Row>> {
        Ok(self.store.lock().await.select(table, predicate, None))
    }

    async fn select_limit(&self, table: &str, predicate: Option<&Predicate>, limit: u64) -> ModelResult<Vec<Row>> {
        Ok(self.store.lock().await.select(table, predicate, Some(limit)))
    }

    async fn update(
        &self,
        table: &str,
        payload: &Attributes,
        predicate: Option<&Predicate>,
    ) -> ModelResult<Vec<Row>> {
        Ok(self.store.lock().await.update(table, payload, predicate))
    }

    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<u64> {
        Ok(self.store.lock().await.delete(table, predicate))
    }
}

#[async_trait]
impl TransactionalBackend for MemoryBackend {
    async fn begin(&self) -> ModelResult<Arc<dyn TransactionScope>> {
        let tx: Arc<dyn TransactionScope> = self.begin_transaction().await;
        Ok(tx)
    }
}

/// Snapshot transaction over a [`MemoryBackend`]
pub struct MemoryTransaction {
    label: String,
    parent: Arc<Mutex<TableStore>>,
    working: Mutex<Option<TableStore>>,
    active: AtomicBool,
}

impl MemoryTransaction {
    fn finished(&self) -> ModelError {
        ModelError::Transaction(format!("transaction '{}' has already finished", self.label))
    }
}

#[async_trait]
impl QueryBackend for MemoryTransaction {
    fn label(&self) -> &str {
        &self.label
    }

    async fn insert(&self, table: &str, payload: &Attributes) -> ModelResult<Vec<Row>> {
        let mut working = self.working.lock().await;
        let store = working.as_mut().ok_or_else(|| self.finished())?;
        Ok(vec![store.insert(table, payload)])
    }

    async fn select(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<Vec<Row>> {
        let working = self.working.lock().await;
        let store = working.as_ref().ok_or_else(|| self.finished())?;
        Ok(store.select(table, predicate, None))
    }

    async fn select_limit(&self, table: &str, predicate: Option<&Predicate>, limit: u64) -> ModelResult<Vec<Row>> {
        let working = self.working.lock().await;
        let store = working.as_ref().ok_or_else(|| self.finished())?;
        Ok(store.select(table, predicate, Some(limit)))
    }

    async fn update(
        &self,
        table: &str,
        payload: &Attributes,
        predicate: Option<&Predicate>,
    ) -> ModelResult<Vec<Row>> {
        let mut working = self.working.lock().await;
        let store = working.as_mut().ok_or_else(|| self.finished())?;
        Ok(store.update(table, payload, predicate))
    }

    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<u64> {
        let mut working = self.working.lock().await;
        let store = working.as_mut().ok_or_else(|| self.finished())?;
        Ok(store.delete(table, predicate))
    }
}

#[async_trait]
impl TransactionScope for MemoryTransaction {
    async fn commit(&self) -> ModelResult<()> {
        let store = self.working.lock().await.take().ok_or_else(|| self.finished())?;
        *self.parent.lock().await = store;
        self.active.store(false, Ordering::SeqCst);
        debug!(transaction = %self.label, "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(&self) -> ModelResult<()> {
        self.working.lock().await.take().ok_or_else(|| self.finished())?;
        self.active.store(false, Ordering::SeqCst);
        debug!(transaction = %self.label, "Rolled back in-memory transaction");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn as_backend(self: Arc<Self>) -> BackendHandle {
        self
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.active.load(Ordering::SeqCst) {
            warn!(
                transaction = %self.label,
                "Transaction dropped without commit or rollback - changes discarded"
            );
        }
    }
}
