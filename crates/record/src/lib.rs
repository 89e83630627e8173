//! # elif-record: Active-record models for elif.rs
//!
//! Model types with dual-convention attributes (`createdAt` and `created_at`
//! address the same value), a small async query-backend contract, and
//! per-call or per-record transaction binding.
//!
//! ```no_run
//! use elif_record::{attrs, MemoryBackend, ModelDefinition, QueryOptions};
//!
//! # async fn demo() -> elif_record::ModelResult<()> {
//! let backend = MemoryBackend::new();
//! let posts = ModelDefinition::new("Post")
//!     .with_default_backend(backend.handle())
//!     .shared();
//!
//! let mut post = posts.create(attrs! { "authorName" => "ada" }, QueryOptions::new()).await?;
//! post.set("authorName", "grace");
//! post.save(QueryOptions::new().method("update")).await?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod backends;
pub mod config;
pub mod error;
pub mod model;
pub mod naming;
pub mod options;
pub mod query;
pub mod record;
pub mod sql;
pub mod transaction;

pub use attributes::{normalize_keys, AttributeStore, Attributes};
pub use backends::{
    BackendHandle, MemoryBackend, MemoryTransaction, PostgresBackend, PostgresTransaction, QueryBackend,
    TransactionScope, TransactionalBackend,
};
pub use config::{ConfigError, DatabaseConfig};
pub use error::{ModelError, ModelResult};
pub use model::ModelDefinition;
pub use naming::{default_table_name, pluralize, to_snake_case};
pub use options::{QueryOptions, RecordOptions, SaveMethod};
pub use query::{Predicate, Query, QueryKind, QueryOutput, Row};
pub use record::Record;
pub use transaction::with_transaction;

// used by `attrs!`
pub use serde_json::{json, Value};
