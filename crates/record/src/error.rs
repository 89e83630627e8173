//! Error types for the record layer
//!
//! Every operation returns [`ModelResult`]. Configuration and validation
//! failures are raised before any backend call; backend failures are passed
//! through exactly as the backend reported them.

use thiserror::Error;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Error types for model and backend operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// No query backend could be resolved for an operation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller asked for something the model cannot do
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failure reported by the query backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// Attribute (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transaction scope misuse (already committed or rolled back)
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl ModelError {
    /// Error raised when neither an explicit backend, a transaction, nor a
    /// class-level default is available.
    pub fn missing_backend(model: &str) -> Self {
        ModelError::Configuration(format!(
            "no query backend available for model '{}': pass a backend or transaction in the options, \
             bind a transaction to the record, or set a default backend on the model",
            model
        ))
    }

    /// Error raised when `save` receives a method other than insert/update
    pub fn invalid_save_method(method: &str) -> Self {
        ModelError::Validation(format!(
            "invalid save method '{}': expected 'insert' or 'update'",
            method
        ))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ModelError::Configuration(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ModelError::Validation(_))
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, ModelError::Backend(_))
    }
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
