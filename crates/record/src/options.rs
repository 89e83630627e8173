//! Per-call options and backend resolution
//!
//! Every persistence call takes a [`QueryOptions`]; record construction takes
//! a [`RecordOptions`]. The backend used for a call is resolved in this order:
//!
//! 1. `backend` passed in the options
//! 2. `transaction` passed in the options
//! 3. the transaction bound to the record (instance operations only)
//! 4. the backend the record was constructed with (instance operations only)
//! 5. the model's default backend

use std::fmt;
use std::str::FromStr;

use crate::backends::BackendHandle;
use crate::error::ModelError;

/// How `save` persists a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMethod {
    #[default]
    Insert,
    Update,
}

impl SaveMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMethod::Insert => "insert",
            SaveMethod::Update => "update",
        }
    }
}

impl fmt::Display for SaveMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveMethod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(SaveMethod::Insert),
            "update" => Ok(SaveMethod::Update),
            other => Err(ModelError::invalid_save_method(other)),
        }
    }
}

impl From<SaveMethod> for String {
    fn from(method: SaveMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Options accepted by every dispatcher and lifecycle operation
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub backend: Option<BackendHandle>,
    pub transaction: Option<BackendHandle>,
    /// Save method as requested by the caller; validated by `save`
    pub method: Option<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run on this backend regardless of any transaction or default
    pub fn backend(mut self, backend: BackendHandle) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Run inside this transaction scope
    pub fn transaction(mut self, transaction: BackendHandle) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Save method: `"insert"`, `"update"` or a [`SaveMethod`]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Parse the requested save method, defaulting to insert
    pub fn save_method(&self) -> Result<SaveMethod, ModelError> {
        match self.method.as_deref() {
            None => Ok(SaveMethod::default()),
            Some(method) => method.parse(),
        }
    }

    /// Explicit backend, then transaction
    pub fn explicit_backend(&self) -> Option<BackendHandle> {
        self.backend.clone().or_else(|| self.transaction.clone())
    }

    /// Backend/transaction to hand to records materialized by this call
    pub fn record_options(&self) -> RecordOptions {
        RecordOptions {
            backend: self.backend.clone(),
            transaction: self.transaction.clone(),
        }
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("backend", &self.backend.as_ref().map(|b| b.label().to_string()))
            .field("transaction", &self.transaction.as_ref().map(|t| t.label().to_string()))
            .field("method", &self.method)
            .finish()
    }
}

/// Options accepted when constructing a record
#[derive(Clone, Default)]
pub struct RecordOptions {
    pub backend: Option<BackendHandle>,
    pub transaction: Option<BackendHandle>,
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: BackendHandle) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn transaction(mut self, transaction: BackendHandle) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

impl fmt::Debug for RecordOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordOptions")
            .field("backend", &self.backend.as_ref().map(|b| b.label().to_string()))
            .field("transaction", &self.transaction.as_ref().map(|t| t.label().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    #[test]
    fn test_save_method_parsing() {
        assert_eq!("insert".parse::<SaveMethod>().unwrap(), SaveMethod::Insert);
        assert_eq!("update".parse::<SaveMethod>().unwrap(), SaveMethod::Update);

        let err = "explode".parse::<SaveMethod>().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("'insert' or 'update'"));
    }

    #[test]
    fn test_default_save_method_is_insert() {
        assert_eq!(QueryOptions::new().save_method().unwrap(), SaveMethod::Insert);
        assert_eq!(
            QueryOptions::new().method(SaveMethod::Update).save_method().unwrap(),
            SaveMethod::Update
        );
    }

    #[test]
    fn test_explicit_backend_wins_over_transaction() {
        let backend = MemoryBackend::new().labeled("explicit").handle();
        let tx = MemoryBackend::new().labeled("tx").handle();

        let options = QueryOptions::new().transaction(tx.clone()).backend(backend);
        assert_eq!(options.explicit_backend().unwrap().label(), "explicit");

        let options = QueryOptions::new().transaction(tx);
        assert_eq!(options.explicit_backend().unwrap().label(), "tx");

        assert!(QueryOptions::new().explicit_backend().is_none());
    }

    #[test]
    fn test_debug_shows_labels() {
        let options = QueryOptions::new().backend(MemoryBackend::new().labeled("primary").handle());
        let rendered = format!("{:?}", options);
        assert!(rendered.contains("primary"));
    }
}
