//! # SQL Utilities Module
//!
//! Identifier quoting, parameter placeholder generation and conversion
//! between JSON values and driver-bound arguments. Statement builders write
//! their SQL through [`SqlWriter`], which collects bound parameters in
//! traversal order and renders the correct placeholder style per driver
//! (`$n` for PostgreSQL, `?` for SQLite).

use heck::ToSnakeCase;
use serde_json::Value;
use sqlx::{any::AnyArguments, Arguments, Row};

use crate::{
    database::Drivers,
    schema::{FieldStorage, Record},
    Error,
};

// ============================================================================
// Identifier Helpers
// ============================================================================

/// Quotes a table or column identifier for safe interpolation.
///
/// Embedded double quotes are doubled, which is the escape rule shared by
/// both supported dialects.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Converts a field or collection name to its storage identifier.
///
/// Collection names are PascalCase and field names camelCase in definitions;
/// both map onto snake_case tables and columns.
pub fn storage_name(name: &str) -> String {
    name.strip_prefix("r#").unwrap_or(name).to_snake_case()
}

/// Renders a JSON value as a SQL literal, for diagnostics only.
///
/// Compiled statements always bind parameters; this is used when logging.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

// ============================================================================
// SqlWriter Struct
// ============================================================================

/// Accumulates a SQL string and its bound parameters.
///
/// The writer owns placeholder numbering so that nested condition groups and
/// count-query rewrites can never drift out of sync with the parameter list.
#[derive(Debug)]
pub(crate) struct SqlWriter {
    driver: Drivers,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    pub fn new(driver: Drivers) -> Self {
        Self {
            driver,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn driver(&self) -> Drivers {
        self.driver
    }

    /// Appends a raw SQL fragment.
    pub fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// Appends a quoted identifier.
    pub fn push_ident(&mut self, name: &str) {
        let quoted = quote_ident(name);
        self.sql.push_str(&quoted);
    }

    /// Appends the next placeholder and records the parameter.
    pub fn bind(&mut self, value: Value) {
        self.params.push(value);
        match self.driver {
            Drivers::Postgres => {
                self.sql.push('$');
                self.sql.push_str(&self.params.len().to_string());
            }
            Drivers::SQLite => self.sql.push('?'),
        }
    }

    pub fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

// ============================================================================
// Parameter Binding
// ============================================================================

/// Converts collected JSON parameters into driver arguments.
///
/// Booleans are bound as `0`/`1` integers: the sqlx Any driver does not map
/// SQLite booleans symmetrically, so boolean fields ride on INTEGER storage
/// across both backends. Arrays and objects are bound as their JSON text.
pub(crate) fn bind_params<'q>(params: &[Value]) -> Result<AnyArguments<'q>, Error> {
    let mut args = AnyArguments::default();
    for value in params {
        let result = match value {
            Value::Null => args.add(Option::<String>::None),
            Value::Bool(b) => args.add(if *b { 1_i64 } else { 0_i64 }),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    args.add(i)
                } else {
                    args.add(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => args.add(s.clone()),
            other => args.add(other.to_string()),
        };
        result.map_err(|e| Error::query(format!("failed to bind parameter: {e}")))?;
    }
    Ok(args)
}

// ============================================================================
// Row Decoding
// ============================================================================

/// Decodes a driver row into a record, positionally, using the declared
/// storage of each selected field.
pub(crate) fn decode_row(
    row: &sqlx::any::AnyRow,
    shape: &[(String, FieldStorage)],
) -> Result<Record, Error> {
    let mut record = Record::new();

    for (index, (field, storage)) in shape.iter().enumerate() {
        let value = match storage {
            FieldStorage::Integer => row
                .try_get::<Option<i64>, _>(index)?
                .map_or(Value::Null, Value::from),
            FieldStorage::Float => row
                .try_get::<Option<f64>, _>(index)?
                .map_or(Value::Null, Value::from),
            FieldStorage::Boolean => match row.try_get::<Option<i64>, _>(index) {
                Ok(int) => int.map_or(Value::Null, |i| Value::Bool(i != 0)),
                // PostgreSQL BOOLEAN columns decode natively.
                Err(_) => row
                    .try_get::<Option<bool>, _>(index)?
                    .map_or(Value::Null, Value::Bool),
            },
            FieldStorage::Text => row
                .try_get::<Option<String>, _>(index)?
                .map_or(Value::Null, Value::from),
            FieldStorage::Json => match row.try_get::<Option<String>, _>(index)? {
                Some(text) => {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                }
                None => Value::Null,
            },
        };
        record.insert(field.clone(), value);
    }

    Ok(record)
}
