//! Model definitions and class-level persistence operations
//!
//! A [`ModelDefinition`] is the class side of a model type: its name, table,
//! primary key column and default backend, plus the operations that build
//! records or query for them.
//!
//! Definitions are shared through `Arc`. A process-wide definition is usually
//! kept in a `once_cell::sync::Lazy` static:
//!
//! ```
//! use std::sync::Arc;
//! use once_cell::sync::Lazy;
//! use elif_record::ModelDefinition;
//!
//! static POSTS: Lazy<Arc<ModelDefinition>> = Lazy::new(|| ModelDefinition::new("Post").shared());
//!
//! assert_eq!(POSTS.table_name(), "posts");
//! ```
//!
//! Settings are interior-mutable and never reset on their own. They are
//! meant to be written once at startup (or between isolated test phases) by
//! a single writer; changing them while operations are in flight is a
//! caller error.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::attributes::{normalize_keys, Attributes};
use crate::backends::BackendHandle;
use crate::error::{ModelError, ModelResult};
use crate::naming::default_table_name;
use crate::options::{QueryOptions, RecordOptions, SaveMethod};
use crate::query::{Predicate, Query, Row};
use crate::record::Record;

/// Class-level settings and operations of one model type
pub struct ModelDefinition {
    name: String,
    primary_key: String,
    table_name: RwLock<Option<String>>,
    default_backend: RwLock<Option<BackendHandle>>,
}

impl ModelDefinition {
    /// Definition named after the model type, e.g. `"BlogPost"`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            table_name: RwLock::new(None),
            default_backend: RwLock::new(None),
        }
    }

    pub fn with_table_name(self, table_name: impl Into<String>) -> Self {
        self.set_table_name(table_name);
        self
    }

    /// Primary key column used by `find`, update and instance destroy.
    ///
    /// Backends generate keys on their own terms: pair a custom key with a
    /// backend that fills the same column, e.g.
    /// `MemoryBackend::with_options("memory", "post_id", true)`.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_default_backend(self, backend: BackendHandle) -> Self {
        self.set_default_backend(backend);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Explicit table name, or the pluralized snake case of the model name
    pub fn table_name(&self) -> String {
        self.table_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| default_table_name(&self.name))
    }

    pub fn set_table_name(&self, table_name: impl Into<String>) {
        *self.table_name.write().unwrap_or_else(PoisonError::into_inner) = Some(table_name.into());
    }

    /// Go back to the derived table name
    pub fn reset_table_name(&self) {
        *self.table_name.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn default_backend(&self) -> Option<BackendHandle> {
        self.default_backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_default_backend(&self, backend: BackendHandle) {
        *self.default_backend.write().unwrap_or_else(PoisonError::into_inner) = Some(backend);
    }

    pub fn clear_default_backend(&self) {
        *self.default_backend.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Explicit backend > transaction > model default
    pub fn resolve_backend(&self, options: &QueryOptions) -> ModelResult<BackendHandle> {
        options
            .explicit_backend()
            .or_else(|| self.default_backend())
            .ok_or_else(|| ModelError::missing_backend(&self.name))
    }

    /// New unsaved record. No backend is needed and nothing is sent anywhere.
    pub fn build(self: &Arc<Self>, attributes: Attributes) -> Record {
        Record::new(Arc::clone(self), attributes, RecordOptions::default())
    }

    /// New unsaved record carrying a backend and/or transaction
    pub fn build_with(self: &Arc<Self>, attributes: Attributes, options: RecordOptions) -> Record {
        Record::new(Arc::clone(self), attributes, options)
    }

    /// Build a record and insert it, returning it with generated columns
    /// (identifier, timestamps) filled in from the backend.
    pub async fn create(self: &Arc<Self>, attributes: Attributes, options: QueryOptions) -> ModelResult<Record> {
        let mut record = self.build_with(attributes, options.record_options());
        record.save(options.method(SaveMethod::Insert)).await?;
        Ok(record)
    }

    /// First row matching `predicate`, or `None` when nothing matches
    pub async fn find_one(self: &Arc<Self>, predicate: Predicate, options: QueryOptions) -> ModelResult<Option<Record>> {
        let backend = self.resolve_backend(&options)?;
        let query = Query::select(self.table_name(), Some(predicate)).limit(1);
        debug!(model = %self.name, table = %query.table, backend = %backend.label(), "find_one");

        let row = backend.execute(&query).await?.into_rows().into_iter().next();
        Ok(row.map(|row| self.materialize(row, &options)))
    }

    /// Record by primary key value
    pub async fn find(self: &Arc<Self>, id: impl Into<Value>, options: QueryOptions) -> ModelResult<Option<Record>> {
        let predicate = Predicate::new().eq(&self.primary_key, id);
        self.find_one(predicate, options).await
    }

    /// Update every row matching `predicate` with `payload` and return the
    /// updated rows as records.
    ///
    /// **A `None` or empty predicate updates every row of the table.** There
    /// is no confirmation step.
    pub async fn update_where(
        self: &Arc<Self>,
        payload: Attributes,
        predicate: Option<Predicate>,
        options: QueryOptions,
    ) -> ModelResult<Vec<Record>> {
        let backend = self.resolve_backend(&options)?;
        let query = Query::update(self.table_name(), normalize_keys(payload), predicate);
        if query.targets_all_rows() {
            warn!(model = %self.name, table = %query.table, "update without predicate affects every row");
        }
        debug!(model = %self.name, table = %query.table, backend = %backend.label(), "update_where");

        let rows = backend.execute(&query).await?.into_rows();
        Ok(self.materialize_all(rows, &options))
    }

    /// Delete every row matching `predicate`, returning how many went away.
    ///
    /// **A `None` or empty predicate deletes every row of the table.** There
    /// is no confirmation step.
    pub async fn destroy_where(self: &Arc<Self>, predicate: Option<Predicate>, options: QueryOptions) -> ModelResult<u64> {
        let backend = self.resolve_backend(&options)?;
        let query = Query::delete(self.table_name(), predicate);
        if query.targets_all_rows() {
            warn!(model = %self.name, table = %query.table, "delete without predicate affects every row");
        }
        debug!(model = %self.name, table = %query.table, backend = %backend.label(), "destroy_where");

        Ok(backend.execute(&query).await?.affected())
    }

    /// All rows matching `predicate` (`None`: the whole table), in backend order
    pub async fn all(self: &Arc<Self>, predicate: Option<Predicate>, options: QueryOptions) -> ModelResult<Vec<Record>> {
        let backend = self.resolve_backend(&options)?;
        let query = Query::select(self.table_name(), predicate);
        debug!(model = %self.name, table = %query.table, backend = %backend.label(), "all");

        let rows = backend.execute(&query).await?.into_rows();
        Ok(self.materialize_all(rows, &options))
    }

    fn materialize(self: &Arc<Self>, row: Row, options: &QueryOptions) -> Record {
        Record::new(Arc::clone(self), row, options.record_options())
    }

    fn materialize_all(self: &Arc<Self>, rows: Vec<Row>, options: &QueryOptions) -> Vec<Record> {
        rows.into_iter().map(|row| self.materialize(row, options)).collect()
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("table_name", &self.table_name())
            .field("primary_key", &self.primary_key)
            .field("default_backend", &self.default_backend().map(|b| b.label().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryBackend, QueryBackend};
    use serde_json::json;

    fn posts(backend: &MemoryBackend) -> Arc<ModelDefinition> {
        ModelDefinition::new("Post")
            .with_default_backend(backend.handle())
            .shared()
    }

    #[test]
    fn test_table_name_default_and_override() {
        let model = ModelDefinition::new("BlogPost");
        assert_eq!(model.table_name(), "blog_posts");

        model.set_table_name("articles");
        assert_eq!(model.table_name(), "articles");

        model.reset_table_name();
        assert_eq!(model.table_name(), "blog_posts");
    }

    #[test]
    fn test_build_needs_no_backend() {
        let model = ModelDefinition::new("Post").shared();
        let record = model.build(crate::attrs! { "title" => "draft" });
        assert_eq!(record.get("title"), Some(&json!("draft")));
    }

    #[tokio::test]
    async fn test_operations_without_backend_fail_with_configuration_error() {
        let model = ModelDefinition::new("Post").shared();

        let err = model.find_one(Predicate::new().eq("id", 1), QueryOptions::new()).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(model.all(None, QueryOptions::new()).await.unwrap_err().is_configuration());
        assert!(model.destroy_where(None, QueryOptions::new()).await.unwrap_err().is_configuration());
        assert!(model
            .update_where(crate::attrs! { "a" => 1 }, None, QueryOptions::new())
            .await
            .unwrap_err()
            .is_configuration());
        assert!(model
            .create(crate::attrs! { "a" => 1 }, QueryOptions::new())
            .await
            .unwrap_err()
            .is_configuration());
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let backend = MemoryBackend::new();
        let model = posts(&backend);

        let created = model.create(crate::attrs! { "foo" => "bar" }, QueryOptions::new()).await.unwrap();
        let id = created.id().cloned().unwrap();
        assert!(created.get("created_at").is_some());
        assert!(created.get("updatedAt").is_some());

        let found = model.find(id, QueryOptions::new()).await.unwrap().unwrap();
        assert_eq!(found.get("foo"), Some(&json!("bar")));
    }

    #[tokio::test]
    async fn test_find_one_returns_none_when_nothing_matches() {
        let backend = MemoryBackend::new();
        let model = posts(&backend);

        let found = model
            .find_one(Predicate::new().eq("foo", "nope"), QueryOptions::new())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_update_where_normalizes_payload_keys() {
        let backend = MemoryBackend::new();
        let model = posts(&backend);
        model.create(crate::attrs! { "authorName" => "a" }, QueryOptions::new()).await.unwrap();

        let updated = model
            .update_where(crate::attrs! { "authorName" => "b" }, None, QueryOptions::new())
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].get("author_name"), Some(&json!("b")));

        let rows = backend.select("posts", None).await.unwrap();
        assert!(rows[0].get("authorName").is_none());
    }

    #[tokio::test]
    async fn test_all_preserves_backend_order() {
        let backend = MemoryBackend::new();
        let model = posts(&backend);
        for title in ["first", "second", "third"] {
            model.create(crate::attrs! { "title" => title }, QueryOptions::new()).await.unwrap();
        }

        let titles: Vec<_> = model
            .all(None, QueryOptions::new())
            .await
            .unwrap()
            .iter()
            .map(|r| r.get("title").cloned().unwrap())
            .collect();
        assert_eq!(titles, vec![json!("first"), json!("second"), json!("third")]);
    }

    #[tokio::test]
    async fn test_find_one_asks_for_a_single_row() {
        let backend = MemoryBackend::new();
        let model = posts(&backend);
        for title in ["first", "second"] {
            model.create(crate::attrs! { "title" => title }, QueryOptions::new()).await.unwrap();
        }

        let found = model.find_one(Predicate::new(), QueryOptions::new()).await.unwrap().unwrap();
        assert_eq!(found.get("title"), Some(&json!("first")));
    }

    #[tokio::test]
    async fn test_custom_primary_key_with_matching_backend() {
        let backend = MemoryBackend::with_options("memory", "post_id", true);
        let model = ModelDefinition::new("Post")
            .with_primary_key("post_id")
            .with_default_backend(backend.handle())
            .shared();

        let mut post = model.create(crate::attrs! { "title" => "a" }, QueryOptions::new()).await.unwrap();
        assert_eq!(post.id(), Some(&json!(1)));
        assert!(post.get("id").is_none());

        post.set("title", "b");
        post.save(QueryOptions::new().method(SaveMethod::Update)).await.unwrap();

        let found = model.find(1, QueryOptions::new()).await.unwrap().unwrap();
        assert_eq!(found.get("title"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn test_custom_primary_key_needs_backend_to_fill_it() {
        let backend = MemoryBackend::new();
        let model = ModelDefinition::new("Post")
            .with_primary_key("post_id")
            .with_default_backend(backend.handle())
            .shared();

        let mut post = model.create(crate::attrs! { "title" => "a" }, QueryOptions::new()).await.unwrap();
        assert!(post.id().is_none());
        let err = post.save(QueryOptions::new().method(SaveMethod::Update)).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_debug_output() {
        let model = ModelDefinition::new("Post").with_primary_key("post_id");
        let rendered = format!("{:?}", model);
        assert!(rendered.contains("posts"));
        assert!(rendered.contains("post_id"));
    }
}
