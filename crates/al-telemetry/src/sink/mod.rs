//! Bulk sink contract.
//!
//! A sink persists one batch as a single bulk operation. Rows are checked
//! against the schema before anything is written, so a bad row rejects the
//! whole batch and readers never observe part of one.

mod memory;
mod parquet;
mod sqlite;

pub use self::memory::MemorySink;
pub use self::parquet::{ParquetSink, SCHEMA_VERSION_KEY};
pub use self::sqlite::{RowQuery, SqliteSink};

use crate::schema::{SchemaError, TableSchema};
use crate::value::Row;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("table {0} does not exist")]
    MissingTable(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value in {table}.{column} is unreadable: {reason}")]
    Decode {
        table: String,
        column: &'static str,
        reason: String,
    },

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl From<SinkError> for al_common::Error {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Schema(e) => al_common::Error::Schema(e.to_string()),
            other => al_common::Error::Sink(other.to_string()),
        }
    }
}

/// Destination write capability shared by every accumulator.
pub trait BulkSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Create the table if it does not exist. Concurrent calls for the same
    /// table must both succeed.
    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError>;

    /// Persist `rows` as one bulk operation. Returns the number of rows written.
    fn write_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<usize, SinkError>;

    /// Distinct non-null text values of one column. A missing table yields
    /// an empty list.
    fn distinct_values(&self, schema: &TableSchema, column: &str)
        -> Result<Vec<String>, SinkError>;
}

impl<S: BulkSink + ?Sized> BulkSink for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        (**self).ensure_table(schema)
    }

    fn write_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<usize, SinkError> {
        (**self).write_batch(schema, rows)
    }

    fn distinct_values(
        &self,
        schema: &TableSchema,
        column: &str,
    ) -> Result<Vec<String>, SinkError> {
        (**self).distinct_values(schema, column)
    }
}
