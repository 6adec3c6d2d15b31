//! Audit log storage.
//!
//! This crate provides:
//! - Schema descriptors: ordered, typed column lists validated once at startup
//! - Row projection from entry records (`Record`)
//! - The `BulkSink` contract and its SQLite, Parquet and in-memory implementations

pub mod record;
pub mod schema;
pub mod sink;
pub mod value;

pub use record::Record;
pub use schema::{offset_column, Column, ColumnType, SchemaError, TableSchema};
pub use sink::{BulkSink, MemorySink, ParquetSink, RowQuery, SinkError, SqliteSink};
pub use value::{Row, Value};

/// Schema version for persisted tables.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Name of the store-assigned surrogate key column.
pub const IDENTITY_COLUMN: &str = "Id";

/// Default row limit for bounded reads.
pub const DEFAULT_SELECT_LIMIT: usize = 1000;
