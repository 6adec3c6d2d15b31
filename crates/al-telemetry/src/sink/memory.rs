//! In-process sink used for dry runs and tests.

use super::{BulkSink, SinkError};
use crate::schema::TableSchema;
use crate::value::{Row, Value};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct MemTable {
    rows: Vec<Row>,
    batch_sizes: Vec<usize>,
}

/// Keeps written rows in memory, keyed by table name.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, MemTable>>,
    fail_writes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch writes fail without storing anything.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// All rows written to `table`, in write order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Size of every successful batch written to `table`.
    pub fn batch_sizes(&self, table: &str) -> Vec<usize> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.batch_sizes.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, |t| t.rows.len())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.lock().contains_key(table)
    }

    fn take_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl BulkSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        schema.validate()?;
        self.tables.lock().entry(schema.table.clone()).or_default();
        Ok(())
    }

    fn write_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<usize, SinkError> {
        schema.check_rows(rows)?;
        if rows.is_empty() {
            return Ok(0);
        }
        if self.take_failure() {
            return Err(SinkError::Unavailable(format!(
                "injected failure writing {}",
                schema.table
            )));
        }

        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(&schema.table)
            .ok_or_else(|| SinkError::MissingTable(schema.table.clone()))?;
        table.rows.extend_from_slice(rows);
        table.batch_sizes.push(rows.len());
        Ok(rows.len())
    }

    fn distinct_values(
        &self,
        schema: &TableSchema,
        column: &str,
    ) -> Result<Vec<String>, SinkError> {
        let index = schema
            .column_index(column)
            .ok_or_else(|| crate::SchemaError::UnknownColumn {
                table: schema.table.clone(),
                column: column.to_string(),
            })?;
        let tables = self.tables.lock();
        let Some(table) = tables.get(&schema.table) else {
            return Ok(Vec::new());
        };
        let values: BTreeSet<String> = table
            .rows
            .iter()
            .filter_map(|row| match row.get(index) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .collect();
        Ok(values.into_iter().collect())
    }
}
