//! Shared test doubles

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use elif_record::{
    Attributes, BackendHandle, MemoryBackend, ModelResult, Predicate, QueryBackend, Row,
};

/// One call observed by a [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub handle: String,
    pub operation: &'static str,
    pub table: String,
}

/// Call log shared by every recording handle of a test
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn handles(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.handle).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

/// Memory backend that records which handle received each call
pub struct RecordingBackend {
    name: String,
    inner: MemoryBackend,
    log: CallLog,
}

impl RecordingBackend {
    pub fn new(name: &str, inner: &MemoryBackend, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            inner: inner.clone(),
            log: log.clone(),
        }
    }

    pub fn handle(name: &str, inner: &MemoryBackend, log: &CallLog) -> BackendHandle {
        Arc::new(Self::new(name, inner, log))
    }

    fn record(&self, operation: &'static str, table: &str) {
        self.log.push(Call {
            handle: self.name.clone(),
            operation,
            table: table.to_string(),
        });
    }
}

#[async_trait]
impl QueryBackend for RecordingBackend {
    fn label(&self) -> &str {
        &self.name
    }

    async fn insert(&self, table: &str, payload: &Attributes) -> ModelResult<Vec<Row>> {
        self.record("insert", table);
        self.inner.insert(table, payload).await
    }

    async fn select(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<Vec<Row>> {
        self.record("select", table);
        self.inner.select(table, predicate).await
    }

    async fn update(
        &self,
        table: &str,
        payload: &Attributes,
        predicate: Option<&Predicate>,
    ) -> ModelResult<Vec<Row>> {
        self.record("update", table);
        self.inner.update(table, payload, predicate).await
    }

    async fn delete(&self, table: &str, predicate: Option<&Predicate>) -> ModelResult<u64> {
        self.record("delete", table);
        self.inner.delete(table, predicate).await
    }
}

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("elif_record=debug")
        .try_init();
}
