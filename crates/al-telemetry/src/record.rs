//! Row projection for entry records.
//!
//! Each record type declares its column list once; `project` must emit values
//! in exactly that order. The column lists are the durable table layout.

use crate::schema::{Column, TableSchema};
use crate::value::{Row, Value};
use al_common::{
    AuditEntry, EntryKind, LocationRecord, LogEntry, RequestEntry, ResponseEntry, Tags,
    TraceEntry, Validate,
};

/// A value that can be written as one row of a table.
pub trait Record: Validate + Send + 'static {
    fn kind() -> EntryKind;

    fn columns() -> &'static [Column];

    fn project(&self) -> Row;

    /// Network address carried by this record, if any.
    fn source_address(&self) -> Option<&str> {
        None
    }

    fn schema(table: impl Into<String>) -> TableSchema {
        TableSchema::new(table, Self::columns())
    }
}

use crate::schema::ColumnType as Ty;

pub const AUDIT_COLUMNS: &[Column] = &[
    Column::required("EventId", Ty::Identifier),
    Column::required("EventName", Ty::String),
    Column::optional("EventTypeId", Ty::Integer),
    Column::required("CorrelationId", Ty::Identifier),
    Column::optional("ApplicationName", Ty::String),
    Column::optional("Environment", Ty::String),
    Column::required("TimeStamp", Ty::Timestamp),
    Column::optional("MachineName", Ty::String),
    Column::optional("ThreadId", Ty::String),
    Column::optional("Path", Ty::String),
    Column::optional("Payload", Ty::String),
    Column::optional("SourceAddress", Ty::String),
    Column::optional("SessionId", Ty::String),
    Column::optional("UserName", Ty::String),
];

pub const LOG_COLUMNS: &[Column] = &[
    Column::required("CommandId", Ty::Identifier),
    Column::required("CommandName", Ty::String),
    Column::required("CorrelationId", Ty::Identifier),
    Column::optional("ApplicationName", Ty::String),
    Column::optional("Environment", Ty::String),
    Column::required("TimeStamp", Ty::Timestamp),
    Column::optional("MachineName", Ty::String),
    Column::optional("ThreadId", Ty::String),
    Column::required("Started", Ty::Timestamp),
    Column::required("Completed", Ty::Timestamp),
    Column::required("Elapsed", Ty::Duration),
    Column::optional("Path", Ty::String),
    Column::optional("Payload", Ty::String),
    Column::required("IsSuccessful", Ty::Boolean),
    Column::optional("Exception", Ty::String),
    Column::optional("ValidationErrors", Ty::String),
    Column::optional("SessionId", Ty::String),
    Column::optional("UserName", Ty::String),
];

pub const REQUEST_COLUMNS: &[Column] = &[
    Column::required("RequestId", Ty::Identifier),
    Column::required("RequestType", Ty::String),
    Column::optional("Parent", Ty::Identifier),
    Column::required("CorrelationId", Ty::Identifier),
    Column::optional("ApplicationName", Ty::String),
    Column::optional("Environment", Ty::String),
    Column::required("TimeStamp", Ty::Timestamp),
    Column::optional("MachineName", Ty::String),
    Column::optional("ThreadId", Ty::String),
    Column::optional("Path", Ty::String),
    Column::optional("Payload", Ty::String),
    Column::optional("SourceAddress", Ty::String),
    Column::optional("SessionId", Ty::String),
    Column::optional("UserName", Ty::String),
];

pub const RESPONSE_COLUMNS: &[Column] = &[
    Column::required("ResponseId", Ty::Identifier),
    Column::required("RequestId", Ty::Identifier),
    Column::required("Endpoint", Ty::String),
    Column::required("CorrelationId", Ty::Identifier),
    Column::optional("ApplicationName", Ty::String),
    Column::optional("Environment", Ty::String),
    Column::required("TimeStamp", Ty::Timestamp),
    Column::optional("MachineName", Ty::String),
    Column::optional("ThreadId", Ty::String),
    Column::required("Started", Ty::Timestamp),
    Column::required("Completed", Ty::Timestamp),
    Column::required("Elapsed", Ty::Duration),
    Column::optional("Path", Ty::String),
    Column::optional("Payload", Ty::String),
    Column::required("IsSuccessful", Ty::Boolean),
    Column::optional("Exception", Ty::String),
    Column::optional("ValidationErrors", Ty::String),
    Column::optional("SourceAddress", Ty::String),
];

pub const TRACE_COLUMNS: &[Column] = &[
    Column::required("Level", Ty::String),
    Column::required("Message", Ty::String),
    Column::optional("Target", Ty::String),
    Column::optional("Exception", Ty::String),
    Column::optional("Properties", Ty::String),
    Column::optional("CorrelationId", Ty::Identifier),
    Column::optional("ApplicationName", Ty::String),
    Column::optional("Environment", Ty::String),
    Column::required("TimeStamp", Ty::Timestamp),
    Column::optional("MachineName", Ty::String),
    Column::optional("ThreadId", Ty::String),
    Column::optional("SourceAddress", Ty::String),
    Column::optional("SessionId", Ty::String),
    Column::optional("UserName", Ty::String),
];

pub const LOCATION_COLUMNS: &[Column] = &[
    Column::required("Address", Ty::String),
    Column::optional("Latitude", Ty::Float),
    Column::optional("Longitude", Ty::Float),
    Column::optional("Isp", Ty::String),
    Column::optional("City", Ty::String),
    Column::optional("Country", Ty::String),
    Column::optional("Postal", Ty::String),
];

/// Column holding the natural key of the location table.
pub const LOCATION_KEY: &str = "Address";

fn tag_values(tags: &Tags) -> [Value; 2] {
    [
        Value::from(tags.application_name.as_ref()),
        Value::from(tags.environment.as_ref()),
    ]
}

fn host_values(tags: &Tags) -> [Value; 2] {
    [
        Value::from(tags.machine_name.as_ref()),
        Value::from(tags.thread_id.as_ref()),
    ]
}

fn non_blank(address: &Option<String>) -> Option<&str> {
    address.as_deref().map(str::trim).filter(|a| !a.is_empty())
}

impl Record for AuditEntry {
    fn kind() -> EntryKind {
        EntryKind::Audit
    }

    fn columns() -> &'static [Column] {
        AUDIT_COLUMNS
    }

    fn project(&self) -> Row {
        let [app, env] = tag_values(&self.tags);
        let [machine, thread] = host_values(&self.tags);
        vec![
            Value::from(&self.event_id),
            Value::from(&self.event_name),
            Value::from(self.event_type_id),
            Value::from(self.correlation_id.as_str()),
            app,
            env,
            Value::from(self.timestamp),
            machine,
            thread,
            Value::from(self.path.as_ref()),
            Value::from(self.payload.as_ref()),
            Value::from(self.source_address.as_ref()),
            Value::from(self.session_id.as_ref()),
            Value::from(self.user_name.as_ref()),
        ]
    }

    fn source_address(&self) -> Option<&str> {
        non_blank(&self.source_address)
    }
}

impl Record for LogEntry {
    fn kind() -> EntryKind {
        EntryKind::Log
    }

    fn columns() -> &'static [Column] {
        LOG_COLUMNS
    }

    fn project(&self) -> Row {
        let [app, env] = tag_values(&self.tags);
        let [machine, thread] = host_values(&self.tags);
        vec![
            Value::from(&self.command_id),
            Value::from(&self.command_name),
            Value::from(self.correlation_id.as_str()),
            app,
            env,
            Value::from(self.timestamp),
            machine,
            thread,
            Value::from(self.timing.started),
            Value::from(self.timing.completed),
            Value::from(self.timing.elapsed()),
            Value::from(self.path.as_ref()),
            Value::from(self.payload.as_ref()),
            Value::from(self.outcome.is_successful),
            Value::from(self.outcome.exception.as_ref()),
            Value::from(self.outcome.validation_errors_json()),
            Value::from(self.session_id.as_ref()),
            Value::from(self.user_name.as_ref()),
        ]
    }
}

impl Record for RequestEntry {
    fn kind() -> EntryKind {
        EntryKind::Request
    }

    fn columns() -> &'static [Column] {
        REQUEST_COLUMNS
    }

    fn project(&self) -> Row {
        let [app, env] = tag_values(&self.tags);
        let [machine, thread] = host_values(&self.tags);
        vec![
            Value::from(&self.request_id),
            Value::from(&self.request_type),
            Value::from(self.parent.as_ref()),
            Value::from(self.correlation_id.as_str()),
            app,
            env,
            Value::from(self.timestamp),
            machine,
            thread,
            Value::from(self.path.as_ref()),
            Value::from(self.payload.as_ref()),
            Value::from(self.source_address.as_ref()),
            Value::from(self.session_id.as_ref()),
            Value::from(self.user_name.as_ref()),
        ]
    }

    fn source_address(&self) -> Option<&str> {
        non_blank(&self.source_address)
    }
}

impl Record for ResponseEntry {
    fn kind() -> EntryKind {
        EntryKind::Response
    }

    fn columns() -> &'static [Column] {
        RESPONSE_COLUMNS
    }

    fn project(&self) -> Row {
        let [app, env] = tag_values(&self.tags);
        let [machine, thread] = host_values(&self.tags);
        vec![
            Value::from(&self.response_id),
            Value::from(&self.request_id),
            Value::from(&self.endpoint),
            Value::from(self.correlation_id.as_str()),
            app,
            env,
            Value::from(self.timestamp),
            machine,
            thread,
            Value::from(self.timing.started),
            Value::from(self.timing.completed),
            Value::from(self.timing.elapsed()),
            Value::from(self.path.as_ref()),
            Value::from(self.payload.as_ref()),
            Value::from(self.outcome.is_successful),
            Value::from(self.outcome.exception.as_ref()),
            Value::from(self.outcome.validation_errors_json()),
            Value::from(self.source_address.as_ref()),
        ]
    }

    fn source_address(&self) -> Option<&str> {
        non_blank(&self.source_address)
    }
}

impl Record for TraceEntry {
    fn kind() -> EntryKind {
        EntryKind::Trace
    }

    fn columns() -> &'static [Column] {
        TRACE_COLUMNS
    }

    fn project(&self) -> Row {
        let [app, env] = tag_values(&self.tags);
        let [machine, thread] = host_values(&self.tags);
        let correlation = self
            .correlation_id
            .as_ref()
            .filter(|id| !id.is_blank())
            .map(|id| id.as_str());
        vec![
            Value::from(self.level.as_str()),
            Value::from(&self.message),
            Value::from(self.target.as_ref()),
            Value::from(self.exception.as_ref()),
            Value::from(self.properties.as_ref()),
            Value::from(correlation),
            app,
            env,
            Value::from(self.timestamp),
            machine,
            thread,
            Value::from(self.source_address.as_ref()),
            Value::from(self.session_id.as_ref()),
            Value::from(self.user_name.as_ref()),
        ]
    }

    fn source_address(&self) -> Option<&str> {
        non_blank(&self.source_address)
    }
}

impl Record for LocationRecord {
    fn kind() -> EntryKind {
        EntryKind::Location
    }

    fn columns() -> &'static [Column] {
        LOCATION_COLUMNS
    }

    fn project(&self) -> Row {
        vec![
            Value::from(&self.address),
            Value::from(self.latitude),
            Value::from(self.longitude),
            Value::from(self.isp.as_ref()),
            Value::from(self.city.as_ref()),
            Value::from(self.country.as_ref()),
            Value::from(self.postal.as_ref()),
        ]
    }
}
