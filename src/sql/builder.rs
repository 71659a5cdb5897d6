//! Builds single-table INSERT, UPDATE, DELETE, SELECT and CREATE TABLE from a mapping.

use crate::error::MappingError;
use crate::model::TableMapping;
use serde_json::{Map, Value};

/// SQL text with `?` placeholders and the arguments bound to them, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    fn new() -> Self {
        Statement {
            sql: String::new(),
            args: Vec::new(),
        }
    }

    fn push_arg(&mut self, v: Value) -> &'static str {
        self.args.push(v);
        "?"
    }
}

/// Quote identifier (safe: only from mappings).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn value_for<'a>(table: &TableMapping, values: &'a Map<String, Value>, field: &str) -> Result<&'a Value, MappingError> {
    values.get(field).ok_or_else(|| MappingError::MissingValue {
        table: table.table_name().to_string(),
        field: field.to_string(),
    })
}

/// INSERT of every insertable field in declaration order. Defaults must already be resolved into `values`.
pub fn insert(table: &TableMapping, values: &Map<String, Value>) -> Result<Statement, MappingError> {
    let mut q = Statement::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for f in table.insertable() {
        let v = value_for(table, values, f.name())?;
        cols.push(quoted(f.name()));
        placeholders.push(q.push_arg(v.clone()));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(table.table_name()),
        cols.join(", "),
        placeholders.join(", ")
    );
    Ok(q)
}

/// UPDATE of every updatable field, keyed by the primary key (always the last argument).
pub fn update(table: &TableMapping, values: &Map<String, Value>) -> Result<Statement, MappingError> {
    let mut q = Statement::new();
    let mut sets = Vec::new();
    for f in table.updatable() {
        let v = value_for(table, values, f.name())?;
        let ph = q.push_arg(v.clone());
        sets.push(format!("{} = {}", quoted(f.name()), ph));
    }
    if sets.is_empty() {
        return Err(MappingError::NoUpdatableFields {
            table: table.table_name().to_string(),
        });
    }
    let pk = table.primary_key().name();
    let pk_value = value_for(table, values, pk)?;
    let ph = q.push_arg(pk_value.clone());
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        quoted(table.table_name()),
        sets.join(", "),
        quoted(pk),
        ph
    );
    Ok(q)
}

/// DELETE by primary key.
pub fn delete(table: &TableMapping, pk_value: &Value) -> Statement {
    let mut q = Statement::new();
    let ph = q.push_arg(pk_value.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quoted(table.table_name()),
        quoted(table.primary_key().name()),
        ph
    );
    q
}

/// SELECT by primary key. Caller binds the key as sole argument.
pub fn select_by_pk(table: &TableMapping) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ?",
        quoted(table.table_name()),
        quoted(table.primary_key().name())
    )
}

/// SELECT with a raw trailing fragment such as `WHERE email = ?` or `ORDER BY created_at DESC`.
pub fn select_where(table: &TableMapping, clause: &str) -> String {
    with_clause(format!("SELECT * FROM {}", quoted(table.table_name())), clause)
}

/// COUNT of primary keys with a raw trailing fragment.
pub fn count_where(table: &TableMapping, clause: &str) -> String {
    with_clause(
        format!(
            "SELECT count({}) FROM {}",
            quoted(table.primary_key().name()),
            quoted(table.table_name())
        ),
        clause,
    )
}

fn with_clause(mut sql: String, clause: &str) -> String {
    let clause = clause.trim();
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(clause);
    }
    sql
}

/// CREATE TABLE in field declaration order with the mapping's primary key.
pub fn create_table(table: &TableMapping) -> String {
    let mut lines: Vec<String> = table
        .fields()
        .iter()
        .map(|f| {
            if f.is_nullable() {
                format!("  {} {},", quoted(f.name()), f.ddl())
            } else {
                format!("  {} {} NOT NULL,", quoted(f.name()), f.ddl())
            }
        })
        .collect();
    lines.push(format!("  PRIMARY KEY ({})", quoted(table.primary_key().name())));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        quoted(table.table_name()),
        lines.join("\n")
    )
}
