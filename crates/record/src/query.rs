//! Query descriptors - the declarative form of every backend call
//!
//! The record layer never writes SQL. It describes what it wants (table,
//! equality predicate, payload, returning request) and the backend decides
//! how to run it.

use std::fmt;

use serde_json::Value;

use crate::attributes::Attributes;
use crate::naming::to_snake_case;

/// A result row: column name → value
pub type Row = Attributes;

/// Equality conjunction over columns.
///
/// Column names are normalized to snake case on the way in. An empty
/// predicate (like an absent one) matches every row of the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Attributes,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `column = value` condition (`column IS NULL` for null values)
    pub fn eq(mut self, column: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.conditions
            .insert(to_snake_case(column.as_ref()), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.conditions.get(&to_snake_case(column))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.conditions.iter()
    }

    /// Whether a row satisfies every condition.
    ///
    /// A null condition matches both a null column and a missing one.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            match (row.get(column), expected) {
                (None, Value::Null) => true,
                (Some(actual), expected) => actual == expected,
                (None, _) => false,
            }
        })
    }
}

impl From<Attributes> for Predicate {
    fn from(conditions: Attributes) -> Self {
        conditions
            .into_iter()
            .fold(Predicate::new(), |predicate, (column, value)| predicate.eq(column, value))
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Predicate {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Predicate::new(), |predicate, (column, value)| predicate.eq(column, value))
    }
}

/// Kind of statement a [`Query`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Insert,
    Select,
    Update,
    Delete,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Insert => write!(f, "insert"),
            QueryKind::Select => write!(f, "select"),
            QueryKind::Update => write!(f, "update"),
            QueryKind::Delete => write!(f, "delete"),
        }
    }
}

/// Declarative description of one backend call
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub kind: QueryKind,
    pub predicate: Option<Predicate>,
    pub payload: Option<Attributes>,
    /// Ask the backend to return all columns of the affected rows
    pub returning: bool,
    /// Row cap for selects
    pub limit: Option<u64>,
}

impl Query {
    pub fn insert(table: impl Into<String>, payload: Attributes) -> Self {
        Self {
            table: table.into(),
            kind: QueryKind::Insert,
            predicate: None,
            payload: Some(payload),
            returning: true,
            limit: None,
        }
    }

    pub fn select(table: impl Into<String>, predicate: Option<Predicate>) -> Self {
        Self {
            table: table.into(),
            kind: QueryKind::Select,
            predicate,
            payload: None,
            returning: false,
            limit: None,
        }
    }

    pub fn update(
        table: impl Into<String>,
        payload: Attributes,
        predicate: Option<Predicate>,
    ) -> Self {
        Self {
            table: table.into(),
            kind: QueryKind::Update,
            predicate,
            payload: Some(payload),
            returning: true,
            limit: None,
        }
    }

    pub fn delete(table: impl Into<String>, predicate: Option<Predicate>) -> Self {
        Self {
            table: table.into(),
            kind: QueryKind::Delete,
            predicate,
            payload: None,
            returning: false,
            limit: None,
        }
    }

    /// Return at most `limit` rows; only selects honor it
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when the query targets every row of its table
    pub fn targets_all_rows(&self) -> bool {
        self.predicate.as_ref().map_or(true, Predicate::is_empty)
    }
}

/// What a backend hands back for a [`Query`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Affected(u64),
}

impl QueryOutput {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Affected(_) => Vec::new(),
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            QueryOutput::Rows(rows) => rows.len() as u64,
            QueryOutput::Affected(count) => *count,
        }
    }
}
