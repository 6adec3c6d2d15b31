//! Table schema descriptors.
//!
//! A schema is declared once per entry type and is the single source of truth
//! for table creation, row projection order and row validation. Sinks call
//! [`TableSchema::check_row`] for every row before writing any of them.

use crate::value::{Row, Value};
use crate::IDENTITY_COLUMN;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Boolean,
    /// Timestamp carrying its UTC offset.
    Timestamp,
    Duration,
    /// Caller-supplied identifier kept as text.
    Identifier,
    Float,
}

impl ColumnType {
    /// SQLite storage class. Timestamps are RFC 3339 text, durations integer microseconds.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Identifier | ColumnType::Timestamp => "TEXT",
            ColumnType::Integer | ColumnType::Boolean | ColumnType::Duration => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }

    /// Arrow type used for columnar files. Timestamps are normalized to UTC;
    /// the writer's offset goes to the column's [`offset_column`] companion.
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::String | ColumnType::Identifier => DataType::Utf8,
            ColumnType::Integer | ColumnType::Duration => DataType::Int64,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            ColumnType::Float => DataType::Float64,
        }
    }

    /// Whether a non-null value has this column type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::String | ColumnType::Identifier, Value::String(_))
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Boolean, Value::Boolean(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
                | (ColumnType::Duration, Value::Duration(_))
                | (ColumnType::Float, Value::Float(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Duration => "duration",
            ColumnType::Identifier => "identifier",
            ColumnType::Float => "float",
        };
        f.write_str(name)
    }
}

/// Name of the Int32 column holding a timestamp column's UTC offset in
/// seconds. Only columnar files carry it.
pub fn offset_column(name: &str) -> String {
    format!("{}Offset", name)
}

/// One column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("table {table} declares no columns")]
    Empty { table: String },

    #[error("invalid identifier {name:?} in table {table}")]
    InvalidIdentifier { table: String, name: String },

    #[error("table {table} declares column {column} more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table}: row has {actual} values, schema has {expected} columns")]
    Arity {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("table {table}: column {column} expects {expected}, got {actual}")]
    TypeMismatch {
        table: String,
        column: &'static str,
        expected: ColumnType,
        actual: &'static str,
    },

    #[error("table {table}: column {column} is not nullable")]
    NullInRequired { table: String, column: &'static str },

    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },
}

/// Destination table descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    /// Store-assigned surrogate key; never part of a projected row.
    pub identity: &'static str,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: &[Column]) -> Self {
        Self {
            table: table.into(),
            identity: IDENTITY_COLUMN,
            columns: columns.to_vec(),
        }
    }

    /// Structural validation, run once when the schema is registered.
    pub fn validate(&self) -> Result<(), SchemaError> {
        check_identifier(&self.table, &self.table)?;
        if self.columns.is_empty() {
            return Err(SchemaError::Empty {
                table: self.table.clone(),
            });
        }

        let mut seen = HashSet::new();
        seen.insert(self.identity.to_ascii_lowercase());
        for column in &self.columns {
            check_identifier(&self.table, column.name)?;
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.table.clone(),
                    column: column.name.to_string(),
                });
            }
        }
        for column in self.columns.iter().filter(|c| c.ty == ColumnType::Timestamp) {
            let companion = offset_column(column.name);
            if !seen.insert(companion.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.table.clone(),
                    column: companion,
                });
            }
        }
        Ok(())
    }

    /// Check arity, value types and nullability of one row.
    pub fn check_row(&self, row: &Row) -> Result<(), SchemaError> {
        if row.len() != self.columns.len() {
            return Err(SchemaError::Arity {
                table: self.table.clone(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (column, value) in self.columns.iter().zip(row) {
            if value.is_null() {
                if !column.nullable {
                    return Err(SchemaError::NullInRequired {
                        table: self.table.clone(),
                        column: column.name,
                    });
                }
                continue;
            }
            if !column.ty.accepts(value) {
                return Err(SchemaError::TypeMismatch {
                    table: self.table.clone(),
                    column: column.name,
                    expected: column.ty,
                    actual: value.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Check every row; the first failure rejects the whole batch.
    pub fn check_rows(&self, rows: &[Row]) -> Result<(), SchemaError> {
        rows.iter().try_for_each(|row| self.check_row(row))
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, SchemaError> {
        self.column_index(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: self.table.clone(),
                column: name.to_string(),
            })
    }

    /// Arrow schema in column order; every timestamp column is followed by
    /// its offset companion.
    pub fn arrow_schema(&self) -> Arc<Schema> {
        let mut fields = Vec::with_capacity(self.columns.len());
        for c in &self.columns {
            fields.push(Field::new(c.name, c.ty.arrow_type(), c.nullable));
            if c.ty == ColumnType::Timestamp {
                fields.push(Field::new(offset_column(c.name), DataType::Int32, c.nullable));
            }
        }
        Arc::new(Schema::new(fields))
    }
}

fn check_identifier(table: &str, name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            table: table.to_string(),
            name: name.to_string(),
        })
    }
}
