//! Parquet bulk sink.
//!
//! Layout: `<root>/<table>/batch-<utc millis>-<seq>.parquet`. Every batch is
//! written to a hidden temp file and renamed into place once the footer is
//! flushed, so a reader listing the directory only ever sees complete files.
//!
//! Timestamps are stored as UTC microseconds plus an Int32 offset companion
//! column, so rows read back carry the offset they were written with.

use super::{BulkSink, SinkError};
use crate::schema::{offset_column, Column, ColumnType, TableSchema};
use crate::value::{Row, Value};
use crate::SCHEMA_VERSION;
use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::arrow::ArrowWriter;
use ::parquet::basic::{Compression, ZstdLevel};
use ::parquet::file::properties::WriterProperties;
use ::parquet::format::KeyValue;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const FILE_EXTENSION: &str = "parquet";

/// File metadata key recording the table layout version.
pub const SCHEMA_VERSION_KEY: &str = "auditlog.schema_version";

pub struct ParquetSink {
    root: PathBuf,
    sequence: AtomicU64,
    compression: Compression,
}

impl ParquetSink {
    /// Create a sink rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            sequence: AtomicU64::new(0),
            compression: Compression::ZSTD(ZstdLevel::default()),
        })
    }

    /// Use snappy instead of zstd.
    pub fn with_snappy(mut self) -> Self {
        self.compression = Compression::SNAPPY;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_dir(&self, schema: &TableSchema) -> PathBuf {
        self.root.join(&schema.table)
    }

    /// Completed batch files of a table, oldest first.
    pub fn batch_files(&self, schema: &TableSchema) -> Result<Vec<PathBuf>, SinkError> {
        let dir = self.table_dir(schema);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
                    && !is_hidden(p)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Every stored row of a table, oldest file first.
    pub fn read_rows(&self, schema: &TableSchema) -> Result<Vec<Row>, SinkError> {
        let mut rows = Vec::new();
        for path in self.batch_files(schema)? {
            let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
            for batch in reader {
                rows.extend(rows_from_batch(schema, &batch?)?);
            }
        }
        Ok(rows)
    }

    fn next_file_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "batch-{}-{:06}.{}",
            chrono::Utc::now().timestamp_millis(),
            seq,
            FILE_EXTENSION
        )
    }

    fn write_file(&self, path: &Path, batch: &RecordBatch) -> Result<(), SinkError> {
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_key_value_metadata(Some(vec![KeyValue::new(
                SCHEMA_VERSION_KEY.to_string(),
                SCHEMA_VERSION.to_string(),
            )]))
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }
}

impl BulkSink for ParquetSink {
    fn name(&self) -> &str {
        "parquet"
    }

    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        schema.validate()?;
        fs::create_dir_all(self.table_dir(schema))?;
        Ok(())
    }

    fn write_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<usize, SinkError> {
        schema.check_rows(rows)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let dir = self.table_dir(schema);
        if !dir.is_dir() {
            return Err(SinkError::MissingTable(schema.table.clone()));
        }

        let batch = to_record_batch(schema, rows)?;
        let name = self.next_file_name();
        let tmp = dir.join(format!(".{}.tmp", name));
        let target = dir.join(&name);

        if let Err(e) = self.write_file(&tmp, &batch) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove partial batch file");
            }
            return Err(e);
        }
        fs::rename(&tmp, &target)?;
        debug!(table = %schema.table, rows = rows.len(), file = %name, "wrote parquet batch");
        Ok(rows.len())
    }

    fn distinct_values(
        &self,
        schema: &TableSchema,
        column: &str,
    ) -> Result<Vec<String>, SinkError> {
        let column = schema.require_column(column)?;
        let mut values = BTreeSet::new();
        for path in self.batch_files(schema)? {
            let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
            for batch in reader {
                let batch = batch?;
                let Some(array) = batch.column_by_name(column.name) else {
                    continue;
                };
                if let Some(strings) = array.as_any().downcast_ref::<StringArray>() {
                    values.extend(strings.iter().flatten().map(str::to_string));
                }
            }
        }
        Ok(values.into_iter().collect())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Build one Arrow batch from rows already checked against `schema`.
fn to_record_batch(schema: &TableSchema, rows: &[Row]) -> Result<RecordBatch, SinkError> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.columns.len());
    for (i, column) in schema.columns.iter().enumerate() {
        let cells = || rows.iter().map(move |row| &row[i]);
        arrays.push(column_array(column.ty, cells()));
        if column.ty == ColumnType::Timestamp {
            arrays.push(offset_array(cells()));
        }
    }
    Ok(RecordBatch::try_new(schema.arrow_schema(), arrays)?)
}

fn offset_array<'a>(cells: impl Iterator<Item = &'a Value>) -> ArrayRef {
    Arc::new(
        cells
            .map(|v| match v {
                Value::Timestamp(t) => Some(t.offset().local_minus_utc()),
                _ => None,
            })
            .collect::<Int32Array>(),
    )
}

fn column_array<'a>(ty: ColumnType, cells: impl Iterator<Item = &'a Value>) -> ArrayRef {
    match ty {
        ColumnType::String | ColumnType::Identifier => Arc::new(
            cells
                .map(|v| match v {
                    Value::String(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
        ColumnType::Integer => Arc::new(
            cells
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        ColumnType::Duration => Arc::new(
            cells
                .map(|v| match v {
                    Value::Duration(d) => Some(Value::duration_micros(d)),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        ColumnType::Boolean => Arc::new(
            cells
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        ColumnType::Timestamp => Arc::new(
            cells
                .map(|v| match v {
                    Value::Timestamp(t) => Some(t.timestamp_micros()),
                    _ => None,
                })
                .collect::<TimestampMicrosecondArray>()
                .with_timezone("UTC"),
        ),
        ColumnType::Float => Arc::new(
            cells
                .map(|v| match v {
                    Value::Float(f) => Some(*f),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
    }
}

fn typed<A: Array + 'static>(array: &ArrayRef) -> Option<&A> {
    array.as_any().downcast_ref::<A>()
}

/// Turn one Arrow batch back into rows in schema column order.
fn rows_from_batch(schema: &TableSchema, batch: &RecordBatch) -> Result<Vec<Row>, SinkError> {
    let mut rows: Vec<Row> = (0..batch.num_rows())
        .map(|_| Vec::with_capacity(schema.columns.len()))
        .collect();
    for column in &schema.columns {
        let cells = column_values(schema, column, batch)?;
        for (row, value) in rows.iter_mut().zip(cells) {
            row.push(value);
        }
    }
    Ok(rows)
}

fn column_values(
    schema: &TableSchema,
    column: &Column,
    batch: &RecordBatch,
) -> Result<Vec<Value>, SinkError> {
    let bad = |reason: String| SinkError::Decode {
        table: schema.table.clone(),
        column: column.name,
        reason,
    };
    let array = batch
        .column_by_name(column.name)
        .ok_or_else(|| bad("column missing from file".to_string()))?;
    let mismatch = || bad(format!("unexpected arrow type {}", array.data_type()));

    let values: Vec<Value> = match column.ty {
        ColumnType::String | ColumnType::Identifier => typed::<StringArray>(array)
            .ok_or_else(mismatch)?
            .iter()
            .map(|v| v.map_or(Value::Null, Value::from))
            .collect(),
        ColumnType::Integer => typed::<Int64Array>(array)
            .ok_or_else(mismatch)?
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Integer))
            .collect(),
        ColumnType::Duration => typed::<Int64Array>(array)
            .ok_or_else(mismatch)?
            .iter()
            .map(|v| {
                v.map_or(Value::Null, |us| {
                    Value::Duration(Duration::from_micros(u64::try_from(us).unwrap_or(0)))
                })
            })
            .collect(),
        ColumnType::Boolean => typed::<BooleanArray>(array)
            .ok_or_else(mismatch)?
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Boolean))
            .collect(),
        ColumnType::Float => typed::<Float64Array>(array)
            .ok_or_else(mismatch)?
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Float))
            .collect(),
        ColumnType::Timestamp => {
            let micros = typed::<TimestampMicrosecondArray>(array).ok_or_else(mismatch)?;
            let offsets = batch
                .column_by_name(&offset_column(column.name))
                .and_then(typed::<Int32Array>)
                .ok_or_else(|| bad("offset column missing from file".to_string()))?;
            let mut values = Vec::with_capacity(micros.len());
            for (us, offset) in micros.iter().zip(offsets.iter()) {
                let Some(us) = us else {
                    values.push(Value::Null);
                    continue;
                };
                let offset = FixedOffset::east_opt(offset.unwrap_or(0))
                    .ok_or_else(|| bad(format!("offset {:?} out of range", offset)))?;
                let utc = DateTime::from_timestamp_micros(us)
                    .ok_or_else(|| bad(format!("{} out of range", us)))?;
                values.push(Value::Timestamp(utc.with_timezone(&offset)));
            }
            values
        }
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use chrono::DateTime;

    #[test]
    fn test_record_batch_types() {
        let schema = TableSchema::new(
            "T",
            &[
                Column::required("At", ColumnType::Timestamp),
                Column::optional("Took", ColumnType::Duration),
            ],
        );
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+02:00").unwrap();
        let rows = vec![vec![
            Value::Timestamp(ts),
            Value::Duration(std::time::Duration::from_millis(3)),
        ]];
        let batch = to_record_batch(&schema, &rows).unwrap();
        assert_eq!(batch.num_rows(), 1);

        let at = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(at.value(0), ts.timestamp_micros());
        let offset = batch.column(1).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(offset.value(0), 2 * 3600);
        let took = batch.column(2).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(took.value(0), 3_000);

        let back = rows_from_batch(&schema, &batch).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_hidden_temp_files_are_skipped() {
        assert!(is_hidden(Path::new("/x/.batch-1.parquet.tmp")));
        assert!(!is_hidden(Path::new("/x/batch-1.parquet")));
    }
}
