//! SQL rendering for query descriptors
//!
//! Turns a [`Query`] into PostgreSQL text with `$n` placeholders and the
//! parameters to bind, in placeholder order.
//!
//! JSON values carry no column types, so a timestamp read back from a row is
//! just a string. When the column types of the table are known, every
//! placeholder is rendered as `CAST($n AS <type>)` so PostgreSQL converts the
//! parameter into the column's type instead of rejecting it.

use std::collections::HashMap;

use serde_json::Value;

use crate::query::{Predicate, Query, QueryKind};

/// Column name → SQL type as printed by `format_type`
pub type ColumnTypes = HashMap<String, String>;

/// Rendered SQL text and its bind parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Target column type of each parameter, when known
    pub param_types: Vec<Option<String>>,
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a query descriptor without column type information
pub fn render(query: &Query) -> Statement {
    render_typed(query, &ColumnTypes::new())
}

/// Render a query descriptor, casting each parameter to its column's type
pub fn render_typed(query: &Query, column_types: &ColumnTypes) -> Statement {
    let table = quote_identifier(&query.table);
    let mut params = Params::new(column_types);
    let empty = Default::default();
    let payload = query.payload.as_ref().unwrap_or(&empty);

    let mut sql = match query.kind {
        QueryKind::Insert => {
            if payload.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", table)
            } else {
                let mut columns = Vec::with_capacity(payload.len());
                let mut placeholders = Vec::with_capacity(payload.len());
                for (column, value) in payload {
                    columns.push(quote_identifier(column));
                    placeholders.push(params.push(column, value));
                }
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
        }
        QueryKind::Select => {
            format!("SELECT * FROM {}{}", table, where_clause(query.predicate.as_ref(), &mut params))
        }
        QueryKind::Update => {
            if payload.is_empty() {
                // Nothing to set: report the targeted rows unchanged
                format!("SELECT * FROM {}{}", table, where_clause(query.predicate.as_ref(), &mut params))
            } else {
                let mut assignments = Vec::with_capacity(payload.len());
                for (column, value) in payload {
                    let placeholder = params.push(column, value);
                    assignments.push(format!("{} = {}", quote_identifier(column), placeholder));
                }
                format!(
                    "UPDATE {} SET {}{}",
                    table,
                    assignments.join(", "),
                    where_clause(query.predicate.as_ref(), &mut params)
                )
            }
        }
        QueryKind::Delete => {
            format!("DELETE FROM {}{}", table, where_clause(query.predicate.as_ref(), &mut params))
        }
    };

    if let (QueryKind::Select, Some(limit)) = (query.kind, query.limit) {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let is_write = matches!(query.kind, QueryKind::Insert | QueryKind::Update);
    if query.returning && is_write && !sql.starts_with("SELECT") {
        sql.push_str(" RETURNING *");
    }

    Statement {
        sql,
        params: params.values,
        param_types: params.types,
    }
}

struct Params<'a> {
    values: Vec<Value>,
    types: Vec<Option<String>>,
    column_types: &'a ColumnTypes,
}

impl<'a> Params<'a> {
    fn new(column_types: &'a ColumnTypes) -> Self {
        Self {
            values: Vec::new(),
            types: Vec::new(),
            column_types,
        }
    }

    /// Record a parameter for `column` and return its placeholder text
    fn push(&mut self, column: &str, value: &Value) -> String {
        let column_type = self.column_types.get(column).cloned();
        self.values.push(value.clone());
        let placeholder = format!("${}", self.values.len());
        let rendered = match &column_type {
            Some(column_type) => format!("CAST({} AS {})", placeholder, column_type),
            None => placeholder,
        };
        self.types.push(column_type);
        rendered
    }
}

fn where_clause(predicate: Option<&Predicate>, params: &mut Params<'_>) -> String {
    let Some(predicate) = predicate.filter(|p| !p.is_empty()) else {
        return String::new();
    };

    let mut conditions = Vec::with_capacity(predicate.len());
    for (column, value) in predicate.iter() {
        if value.is_null() {
            conditions.push(format!("{} IS NULL", quote_identifier(column)));
        } else {
            let placeholder = params.push(column, value);
            conditions.push(format!("{} = {}", quote_identifier(column), placeholder));
        }
    }

    format!(" WHERE {}", conditions.join(" AND "))
}
