//! Attribute Store - dual-convention attribute storage for records
//!
//! A record keeps every attribute twice: under the key the caller wrote
//! (the exposure key, any case convention) and under its snake-case storage
//! key. The exposure map drives enumeration and serialization; the storage
//! map is what gets sent to the backend as column values.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};
use crate::naming::to_snake_case;

/// Ordered mapping of attribute (or column) names to values
pub type Attributes = Map<String, Value>;

/// Build an [`Attributes`] map from `key => value` pairs.
///
/// Values go through `serde_json::json!`, so any serializable expression works.
///
/// ```
/// let attrs = elif_record::attrs! { "firstName" => "Ada", "age" => 36 };
/// assert_eq!(attrs.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Attributes::new();
        $(
            map.insert(::std::string::String::from($key), $crate::json!($value));
        )+
        map
    }};
}

/// Raw + normalized attribute maps kept consistent by construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    raw: Attributes,
    normalized: Attributes,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store; every entry goes through [`AttributeStore::set`].
    pub fn from_attributes(seed: Attributes) -> Self {
        let mut store = Self::new();
        for (key, value) in seed {
            store.set(key, value);
        }
        store
    }

    /// Read an attribute by either spelling
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.raw.get(key) {
            Some(value) => Some(value),
            None => self.normalized.get(&to_snake_case(key)),
        }
    }

    /// Read an attribute and deserialize it into `T`.
    ///
    /// Returns `Ok(None)` when the attribute is absent or null.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ModelResult<Option<T>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ModelError::Serialization(format!("Failed to deserialize attribute '{}': {}", key, e))
            }),
        }
    }

    /// Write an attribute under `key` and its snake-case mirror.
    ///
    /// If the same logical attribute was previously written with a different
    /// spelling, that spelling is replaced by `key` at its original position.
    /// Returns the previous value of the logical attribute.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let column = to_snake_case(&key);
        let previous = self.normalized.insert(column.clone(), value.clone());

        if previous.is_some() {
            if let Some(existing) = self.raw_key_for(&column) {
                if existing != key {
                    self.rename_raw(&existing, key, value);
                    return previous;
                }
            }
        }

        self.raw.insert(key, value);
        previous
    }

    /// Remove an attribute (either spelling) from both maps
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let column = to_snake_case(key);
        let removed = self.normalized.shift_remove(&column)?;
        if let Some(raw_key) = self.raw_key_for(&column) {
            self.raw.shift_remove(&raw_key);
        }
        Some(removed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Exposure keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.raw.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Attributes keyed as the caller wrote them
    pub fn raw(&self) -> &Attributes {
        &self.raw
    }

    /// Attributes keyed by snake-case column name
    pub fn columns(&self) -> &Attributes {
        &self.normalized
    }

    /// Merge a backend row into the store.
    ///
    /// Columns that already exist under another exposure spelling keep that
    /// spelling; new columns are added under their column name.
    pub fn merge_row(&mut self, row: Attributes) {
        for (column, value) in row {
            let normalized = to_snake_case(&column);
            match self.raw_key_for(&normalized) {
                Some(existing) => {
                    self.raw.insert(existing, value.clone());
                    self.normalized.insert(normalized, value);
                }
                None => {
                    self.set(column, value);
                }
            }
        }
    }

    /// Structural JSON text of the exposure map
    pub fn to_text(&self) -> String {
        Value::Object(self.raw.clone()).to_string()
    }

    fn raw_key_for(&self, column: &str) -> Option<String> {
        self.raw
            .keys()
            .find(|key| to_snake_case(key) == column)
            .cloned()
    }

    fn rename_raw(&mut self, from: &str, to: String, value: Value) {
        let raw = std::mem::take(&mut self.raw);
        self.raw = raw
            .into_iter()
            .map(|(key, existing)| {
                if key == from {
                    (to.clone(), value.clone())
                } else {
                    (key, existing)
                }
            })
            .collect();
    }
}

impl From<Attributes> for AttributeStore {
    fn from(seed: Attributes) -> Self {
        Self::from_attributes(seed)
    }
}

/// Normalize the keys of an attribute map to snake case
pub fn normalize_keys(attributes: Attributes) -> Attributes {
    AttributeStore::from_attributes(attributes).normalized
}
