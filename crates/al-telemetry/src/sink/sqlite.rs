//! SQLite bulk sink.
//!
//! Each batch is inserted inside one transaction with a single prepared
//! statement; readers see either none or all of a batch. Timestamps are stored
//! as RFC 3339 text with their offset and compared through `julianday()`,
//! durations as integer microseconds.

use super::{BulkSink, SinkError};
use crate::schema::{Column, ColumnType, TableSchema};
use crate::value::{Row, Value};
use crate::DEFAULT_SELECT_LIMIT;
use al_common::Timestamp;
use chrono::{DateTime, SecondsFormat};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded read over an entry table, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub limit: usize,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub application: Option<String>,
    pub environment: Option<String>,
}

impl Default for RowQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SELECT_LIMIT,
            since: None,
            until: None,
            application: None,
            environment: None,
        }
    }
}

impl RowQuery {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn between(mut self, since: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn for_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn for_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}

pub struct SqliteSink {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteSink {
    /// Open (or create) a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite sink");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of rows currently stored in the table.
    pub fn count(&self, schema: &TableSchema) -> Result<usize, SinkError> {
        let conn = self.conn.lock();
        if !table_exists(&conn, &schema.table)? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&schema.table));
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Read back rows, newest first. Filters on columns the table lacks are ignored.
    pub fn query(&self, schema: &TableSchema, query: &RowQuery) -> Result<Vec<Row>, SinkError> {
        let conn = self.conn.lock();
        if !table_exists(&conn, &schema.table)? {
            return Err(SinkError::MissingTable(schema.table.clone()));
        }

        let time_column = schema
            .column_index("TimeStamp")
            .map(|i| quote(schema.columns[i].name));
        let mut clauses = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(col) = &time_column {
            if let Some(since) = &query.since {
                clauses.push(format!("julianday({}) >= julianday(?)", col));
                params.push(SqlValue::Text(timestamp_text(since)));
            }
            if let Some(until) = &query.until {
                clauses.push(format!("julianday({}) < julianday(?)", col));
                params.push(SqlValue::Text(timestamp_text(until)));
            }
        }
        for (name, value) in [
            ("ApplicationName", &query.application),
            ("Environment", &query.environment),
        ] {
            if let (Some(i), Some(v)) = (schema.column_index(name), value) {
                clauses.push(format!("{} = ?", quote(schema.columns[i].name)));
                params.push(SqlValue::Text(v.clone()));
            }
        }

        let columns: Vec<String> = schema.columns.iter().map(|c| quote(c.name)).collect();
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), quote(&schema.table));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match &time_column {
            Some(col) => sql.push_str(&format!(" ORDER BY julianday({}) DESC", col)),
            None => sql.push_str(&format!(" ORDER BY {} DESC", quote(schema.identity))),
        }
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));

        trace!(table = %schema.table, %sql, "query");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(schema.columns.len());
            for (i, column) in schema.columns.iter().enumerate() {
                values.push(decode(&schema.table, column, row.get_ref(i)?)?);
            }
            out.push(values);
        }
        Ok(out)
    }
}

impl BulkSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        schema.validate()?;
        let mut defs = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote(schema.identity)
        )];
        defs.extend(schema.columns.iter().map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{}", quote(c.name), c.ty.sql_type(), null)
        }));
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&schema.table),
            defs.join(", ")
        );
        self.conn.lock().execute(&sql, [])?;
        debug!(table = %schema.table, "ensured table");
        Ok(())
    }

    fn write_batch(&self, schema: &TableSchema, rows: &[Row]) -> Result<usize, SinkError> {
        schema.check_rows(rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let columns: Vec<String> = schema.columns.iter().map(|c| quote(c.name)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&schema.table),
            columns.join(", "),
            placeholders
        );

        let mut conn = self.conn.lock();
        // Dropping an uncommitted transaction rolls it back.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter().map(encode)))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn distinct_values(
        &self,
        schema: &TableSchema,
        column: &str,
    ) -> Result<Vec<String>, SinkError> {
        let column = schema.require_column(column)?;
        let conn = self.conn.lock();
        if !table_exists(&conn, &schema.table)? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
            col = quote(column.name),
            table = quote(&schema.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(values.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Identifiers are validated by `TableSchema::validate`; quoting keeps
/// reserved words usable as column names.
fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, SinkError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn timestamp_text(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn encode(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Timestamp(t) => SqlValue::Text(timestamp_text(t)),
        Value::Duration(d) => SqlValue::Integer(Value::duration_micros(d)),
        Value::Float(f) => SqlValue::Real(*f),
    }
}

fn decode(table: &str, column: &Column, raw: ValueRef<'_>) -> Result<Value, SinkError> {
    let bad = |reason: String| SinkError::Decode {
        table: table.to_string(),
        column: column.name,
        reason,
    };
    let value = match (column.ty, raw) {
        (_, ValueRef::Null) => Value::Null,
        (ColumnType::String | ColumnType::Identifier, ValueRef::Text(t)) => {
            Value::String(String::from_utf8_lossy(t).into_owned())
        }
        (ColumnType::Integer, ValueRef::Integer(i)) => Value::Integer(i),
        (ColumnType::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
        (ColumnType::Duration, ValueRef::Integer(i)) => {
            Value::Duration(Duration::from_micros(u64::try_from(i).unwrap_or(0)))
        }
        (ColumnType::Float, ValueRef::Real(f)) => Value::Float(f),
        (ColumnType::Float, ValueRef::Integer(i)) => Value::Float(i as f64),
        (ColumnType::Timestamp, ValueRef::Text(t)) => {
            let text = String::from_utf8_lossy(t);
            DateTime::parse_from_rfc3339(&text)
                .map(Value::Timestamp)
                .map_err(|e| bad(format!("{text:?}: {e}")))?
        }
        (ty, other) => return Err(bad(format!("{:?} stored in {} column", other.data_type(), ty))),
    };
    Ok(value)
}
