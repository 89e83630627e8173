//! Records - model instances and their lifecycle
//!
//! A [`Record`] is one row of a model's table, saved or not. Attributes are
//! read and written through explicit accessors backed by an
//! [`AttributeStore`]; only attributes enumerate or serialize, never the
//! record's bookkeeping (definition, backend, bound transaction).

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::attributes::{AttributeStore, Attributes};
use crate::backends::BackendHandle;
use crate::error::{ModelError, ModelResult};
use crate::model::ModelDefinition;
use crate::options::{QueryOptions, RecordOptions, SaveMethod};
use crate::query::{Predicate, Query};

/// An instance of a model type
#[derive(Clone)]
pub struct Record {
    definition: Arc<ModelDefinition>,
    attributes: AttributeStore,
    backend: Option<BackendHandle>,
    bound_transaction: Option<BackendHandle>,
}

impl Record {
    /// Construct a record; every seed attribute goes through [`Record::set`].
    pub fn new(definition: Arc<ModelDefinition>, seed: Attributes, options: RecordOptions) -> Self {
        Self {
            definition,
            attributes: AttributeStore::from_attributes(seed),
            backend: options.backend,
            bound_transaction: options.transaction,
        }
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    // ---- attributes ----

    /// Attribute value by either spelling (`createdAt` or `created_at`)
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Attribute deserialized into `T`; `Ok(None)` when absent or null
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ModelResult<Option<T>> {
        self.attributes.get_as(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.set(key, value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains(key)
    }

    /// Attribute names as written, in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Attributes keyed as written
    pub fn attributes(&self) -> &Attributes {
        self.attributes.raw()
    }

    /// Attributes keyed by column name; this is what gets persisted
    pub fn column_values(&self) -> &Attributes {
        self.attributes.columns()
    }

    /// Primary key value, if set and not null
    pub fn id(&self) -> Option<&Value> {
        self.get(self.definition.primary_key()).filter(|v| !v.is_null())
    }

    /// JSON text of the attributes as written
    pub fn to_text(&self) -> String {
        self.attributes.to_text()
    }

    // ---- transaction binding ----

    /// Route this record's own `save`/`destroy` through `transaction`
    pub fn bind_transaction(&mut self, transaction: BackendHandle) -> &mut Self {
        self.bound_transaction = Some(transaction);
        self
    }

    /// Owned form of [`Record::bind_transaction`]
    pub fn with_transaction(mut self, transaction: BackendHandle) -> Self {
        self.bound_transaction = Some(transaction);
        self
    }

    pub fn unbind_transaction(&mut self) -> &mut Self {
        self.bound_transaction = None;
        self
    }

    pub fn bound_transaction(&self) -> Option<&BackendHandle> {
        self.bound_transaction.as_ref()
    }

    // ---- persistence ----

    /// Insert (default) or update this record.
    ///
    /// Insert sends every column value and merges the returned row back, so
    /// generated columns such as the identifier and timestamps show up on the
    /// record. Update targets the row by primary key, sends every column
    /// value and merges the returned row.
    pub async fn save(&mut self, options: QueryOptions) -> ModelResult<&mut Self> {
        let method = options.save_method()?;
        let backend = self.resolve_backend(&options)?;
        let table = self.definition.table_name();

        let query = match method {
            SaveMethod::Insert => Query::insert(table, self.column_values().clone()),
            SaveMethod::Update => {
                let predicate = self.primary_key_predicate("update")?;
                Query::update(table, self.column_values().clone(), Some(predicate))
            }
        };

        debug!(
            model = %self.definition.name(),
            table = %query.table,
            method = %method,
            backend = %backend.label(),
            "save"
        );

        let returned = backend.execute(&query).await?.into_rows().into_iter().next();
        if let Some(row) = returned {
            self.attributes.merge_row(row);
        }
        Ok(self)
    }

    /// Delete this record's row, or the rows matching `predicate` when given
    pub async fn destroy(&mut self, predicate: Option<Predicate>, options: QueryOptions) -> ModelResult<&mut Self> {
        let backend = self.resolve_backend(&options)?;
        let predicate = match predicate {
            Some(predicate) => predicate,
            None => self.primary_key_predicate("destroy")?,
        };
        let query = Query::delete(self.definition.table_name(), Some(predicate));

        debug!(
            model = %self.definition.name(),
            table = %query.table,
            backend = %backend.label(),
            "destroy"
        );

        backend.execute(&query).await?;
        Ok(self)
    }

    /// Explicit backend > option transaction > bound transaction >
    /// construction backend > model default
    fn resolve_backend(&self, options: &QueryOptions) -> ModelResult<BackendHandle> {
        options
            .explicit_backend()
            .or_else(|| self.bound_transaction.clone())
            .or_else(|| self.backend.clone())
            .or_else(|| self.definition.default_backend())
            .ok_or_else(|| ModelError::missing_backend(self.definition.name()))
    }

    fn primary_key_predicate(&self, operation: &str) -> ModelResult<Predicate> {
        let primary_key = self.definition.primary_key();
        let id = self.id().cloned().ok_or_else(|| {
            ModelError::Validation(format!(
                "cannot {} a {} record without a value for '{}'",
                operation,
                self.definition.name(),
                primary_key
            ))
        })?;
        Ok(Predicate::new().eq(primary_key, id))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.definition.name())
            .field("attributes", self.attributes.raw())
            .field("backend", &self.backend.as_ref().map(|b| b.label().to_string()))
            .field(
                "bound_transaction",
                &self.bound_transaction.as_ref().map(|t| t.label().to_string()),
            )
            .finish()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.attributes.raw().serialize(serializer)
    }
}

impl PartialEq for Record {
    /// Same model type and same attributes
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.definition, &other.definition) && self.attributes == other.attributes
    }
}
