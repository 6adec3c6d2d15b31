//! Entry records captured by the pipeline.
//!
//! Every entry is an immutable value describing one event at the moment it
//! occurred. Entries carry no storage identity: the destination assigns a
//! surrogate key when the batch holding the entry is written.

use crate::error::{Error, Result};
use crate::id::CorrelationId;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timestamp type used by all entries. The producer's UTC offset is preserved.
pub type Timestamp = DateTime<FixedOffset>;

/// Current time as an offset timestamp.
pub fn now() -> Timestamp {
    Utc::now().fixed_offset()
}

/// Synchronous validation performed before an item may enter a buffer.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Bare strings are what the enrichment pipe buffers (network addresses).
impl Validate for String {
    fn validate(&self) -> Result<()> {
        if self.trim().is_empty() {
            return Err(Error::InvalidEntry("blank address".to_string()));
        }
        Ok(())
    }
}

fn require(kind: EntryKind, field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::MissingField {
            kind: kind.as_str(),
            field,
        });
    }
    Ok(())
}

/// Kind of record flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Audit,
    Log,
    Request,
    Response,
    Trace,
    Location,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audit => "audit",
            Self::Log => "log",
            Self::Request => "request",
            Self::Response => "response",
            Self::Trace => "trace",
            Self::Location => "location",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application and host tags attached to every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Tags {
    pub fn new(application_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            application_name: Some(application_name.into()),
            environment: Some(environment.into()),
            ..Default::default()
        }
    }

    /// Tag with the local host name and the calling thread.
    pub fn with_host(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = Some(machine_name.into());
        self.thread_id = Some(thread_label());
        self
    }
}

/// Name of the calling thread, or its numeric id when it has none.
pub fn thread_label() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => {
            let id = format!("{:?}", thread.id());
            id.trim_start_matches("ThreadId(")
                .trim_end_matches(')')
                .to_string()
        }
    }
}

/// Start/completion window of an executed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub started: Timestamp,
    pub completed: Timestamp,
}

impl Timing {
    pub fn between(started: Timestamp, completed: Timestamp) -> Self {
        Self { started, completed }
    }

    /// Elapsed wall time. Always derived from the window, never stored apart from it.
    pub fn elapsed(&self) -> Duration {
        (self.completed - self.started).to_std().unwrap_or_default()
    }

    fn validate(&self, kind: EntryKind) -> Result<()> {
        if self.completed < self.started {
            return Err(Error::InvertedTiming {
                kind: kind.as_str(),
                started: self.started.to_rfc3339(),
                completed: self.completed.to_rfc3339(),
            });
        }
        Ok(())
    }
}

/// Category of a validation message reported by the executed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Input,
    Security,
    Business,
}

/// One structured validation error produced by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationMessage {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of an executed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub is_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationMessage>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            is_successful: true,
            exception: None,
            validation_errors: Vec::new(),
        }
    }

    pub fn failure(exception: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            exception: Some(exception.into()),
            validation_errors: Vec::new(),
        }
    }

    pub fn rejected(errors: Vec<ValidationMessage>) -> Self {
        Self {
            is_successful: false,
            exception: None,
            validation_errors: errors,
        }
    }

    /// Validation errors as a JSON array, or `None` when there are none.
    pub fn validation_errors_json(&self) -> Option<String> {
        if self.validation_errors.is_empty() {
            return None;
        }
        serde_json::to_string(&self.validation_errors).ok()
    }
}

/// Audit event raised by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type_id: Option<i64>,
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub tags: Tags,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl AuditEntry {
    pub fn new(
        event_id: impl Into<String>,
        event_name: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_name: event_name.into(),
            event_type_id: None,
            correlation_id,
            tags: Tags::default(),
            timestamp: now(),
            path: None,
            payload: None,
            source_address: None,
            session_id: None,
            user_name: None,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

impl Validate for AuditEntry {
    fn validate(&self) -> Result<()> {
        let kind = EntryKind::Audit;
        require(kind, "event_id", &self.event_id)?;
        require(kind, "event_name", &self.event_name)?;
        require(kind, "correlation_id", self.correlation_id.as_str())
    }
}

/// Command execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub command_id: String,
    pub command_name: String,
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub tags: Tags,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl LogEntry {
    pub fn new(
        command_id: impl Into<String>,
        command_name: impl Into<String>,
        correlation_id: CorrelationId,
        timing: Timing,
        outcome: Outcome,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            command_name: command_name.into(),
            correlation_id,
            tags: Tags::default(),
            timestamp: timing.completed,
            timing,
            path: None,
            payload: None,
            outcome,
            session_id: None,
            user_name: None,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.timing.elapsed()
    }
}

impl Validate for LogEntry {
    fn validate(&self) -> Result<()> {
        let kind = EntryKind::Log;
        require(kind, "command_id", &self.command_id)?;
        require(kind, "command_name", &self.command_name)?;
        require(kind, "correlation_id", self.correlation_id.as_str())?;
        self.timing.validate(kind)
    }
}

/// Inbound request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    pub request_id: String,
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub tags: Tags,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl RequestEntry {
    pub fn new(
        request_id: impl Into<String>,
        request_type: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            request_type: request_type.into(),
            parent: None,
            correlation_id,
            tags: Tags::default(),
            timestamp: now(),
            path: None,
            payload: None,
            source_address: None,
            session_id: None,
            user_name: None,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }
}

impl Validate for RequestEntry {
    fn validate(&self) -> Result<()> {
        let kind = EntryKind::Request;
        require(kind, "request_id", &self.request_id)?;
        require(kind, "request_type", &self.request_type)?;
        require(kind, "correlation_id", self.correlation_id.as_str())
    }
}

/// Outbound response record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub response_id: String,
    pub request_id: String,
    pub endpoint: String,
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub tags: Tags,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
}

impl ResponseEntry {
    pub fn new(
        response_id: impl Into<String>,
        request_id: impl Into<String>,
        endpoint: impl Into<String>,
        correlation_id: CorrelationId,
        timing: Timing,
        outcome: Outcome,
    ) -> Self {
        Self {
            response_id: response_id.into(),
            request_id: request_id.into(),
            endpoint: endpoint.into(),
            correlation_id,
            tags: Tags::default(),
            timestamp: timing.completed,
            timing,
            path: None,
            payload: None,
            outcome,
            source_address: None,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.timing.elapsed()
    }
}

impl Validate for ResponseEntry {
    fn validate(&self) -> Result<()> {
        let kind = EntryKind::Response;
        require(kind, "response_id", &self.response_id)?;
        require(kind, "request_id", &self.request_id)?;
        require(kind, "endpoint", &self.endpoint)?;
        require(kind, "correlation_id", self.correlation_id.as_str())?;
        self.timing.validate(kind)
    }
}

/// Severity of a diagnostic trace, most verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leveled diagnostic event emitted by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub level: TraceLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Structured event fields as a JSON object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(flatten)]
    pub tags: Tags,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl TraceEntry {
    pub fn new(level: TraceLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            target: None,
            exception: None,
            properties: None,
            correlation_id: None,
            tags: Tags::default(),
            timestamp: now(),
            source_address: None,
            session_id: None,
            user_name: None,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Blank ids are dropped rather than stored.
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id).filter(|id| !id.is_blank());
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }
}

impl Validate for TraceEntry {
    fn validate(&self) -> Result<()> {
        let kind = EntryKind::Trace;
        require(kind, "message", &self.message)?;
        if let Some(properties) = &self.properties {
            let value: serde_json::Value = serde_json::from_str(properties)?;
            if !value.is_object() {
                return Err(Error::InvalidEntry(
                    "trace properties must be a JSON object".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Any entry, tagged by kind for JSON-lines interchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Audit(AuditEntry),
    Log(LogEntry),
    Request(RequestEntry),
    Response(ResponseEntry),
    Trace(TraceEntry),
}

impl Entry {
    /// Parse one JSON-lines record.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Audit(_) => EntryKind::Audit,
            Entry::Log(_) => EntryKind::Log,
            Entry::Request(_) => EntryKind::Request,
            Entry::Response(_) => EntryKind::Response,
            Entry::Trace(_) => EntryKind::Trace,
        }
    }

    /// Traces are the only entries that may lack a correlation id.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Entry::Audit(e) => Some(&e.correlation_id),
            Entry::Log(e) => Some(&e.correlation_id),
            Entry::Request(e) => Some(&e.correlation_id),
            Entry::Response(e) => Some(&e.correlation_id),
            Entry::Trace(e) => e.correlation_id.as_ref(),
        }
    }
}

impl Validate for Entry {
    fn validate(&self) -> Result<()> {
        match self {
            Entry::Audit(e) => e.validate(),
            Entry::Log(e) => e.validate(),
            Entry::Request(e) => e.validate(),
            Entry::Response(e) => e.validate(),
            Entry::Trace(e) => e.validate(),
        }
    }
}

/// Geo-location resolved for one network address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal: Option<String>,
}

impl LocationRecord {
    /// Minimal record for an address whose lookup failed.
    pub fn unresolved(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            latitude: None,
            longitude: None,
            isp: None,
            city: None,
            country: None,
            postal: None,
        }
    }

    /// Whether any location data beyond the address is present.
    pub fn is_resolved(&self) -> bool {
        self.latitude.is_some()
            || self.longitude.is_some()
            || self.isp.is_some()
            || self.city.is_some()
            || self.country.is_some()
    }
}

impl Validate for LocationRecord {
    fn validate(&self) -> Result<()> {
        require(EntryKind::Location, "address", &self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(secs: i64) -> Timestamp {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .timestamp_opt(1_700_000_000 + secs, 0)
            .unwrap()
    }

    #[test]
    fn test_audit_requires_name() {
        let entry = AuditEntry::new("ev-1", " ", CorrelationId::new());
        let err = entry.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField {
                field: "event_name",
                ..
            }
        ));
    }

    #[test]
    fn test_log_rejects_inverted_timing() {
        let entry = LogEntry::new(
            "cmd-1",
            "AddItem",
            CorrelationId::new(),
            Timing::between(ts(10), ts(5)),
            Outcome::success(),
        );
        assert!(matches!(
            entry.validate(),
            Err(Error::InvertedTiming { kind: "log", .. })
        ));
    }

    #[test]
    fn test_elapsed_derived_from_window() {
        let entry = ResponseEntry::new(
            "resp-1",
            "req-1",
            "/items",
            CorrelationId::new(),
            Timing::between(ts(0), ts(3)),
            Outcome::success(),
        );
        assert!(entry.validate().is_ok());
        assert_eq!(entry.elapsed(), Duration::from_secs(3));
        assert_eq!(entry.timestamp, ts(3));
    }

    #[test]
    fn test_validation_errors_json_null_when_empty() {
        assert_eq!(Outcome::success().validation_errors_json(), None);

        let outcome = Outcome::rejected(vec![ValidationMessage::new(
            ValidationKind::Input,
            "name is required",
        )]);
        assert_eq!(
            outcome.validation_errors_json().as_deref(),
            Some(r#"[{"kind":"input","message":"name is required"}]"#)
        );
    }

    #[test]
    fn test_entry_parses_tagged_json_line() {
        let line = r#"{"kind":"request","request_id":"r1","request_type":"AddItemCommand",
            "correlation_id":"c1","application_name":"shop","timestamp":"2024-03-01T10:00:00+02:00",
            "source_address":"10.0.0.8"}"#;
        let entry = Entry::from_json_line(line).unwrap();
        assert_eq!(entry.kind(), EntryKind::Request);
        assert_eq!(entry.correlation_id().map(CorrelationId::as_str), Some("c1"));
        match entry {
            Entry::Request(req) => {
                assert_eq!(req.tags.application_name.as_deref(), Some("shop"));
                assert_eq!(req.source_address.as_deref(), Some("10.0.0.8"));
                assert_eq!(req.timestamp.offset().local_minus_utc(), 7200);
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_malformed_line_is_json_error() {
        let err = Entry::from_json_line(r#"{"kind":"audit","event_id":"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.code(), 61);
    }

    #[test]
    fn test_trace_line_without_correlation() {
        let line = r#"{"kind":"trace","level":"warning","message":"disk almost full",
            "properties":"{\"free_mb\":12}","timestamp":"2024-03-01T10:00:00Z"}"#;
        let entry = Entry::from_json_line(line).unwrap();
        assert_eq!(entry.kind(), EntryKind::Trace);
        assert!(entry.correlation_id().is_none());
        assert!(entry.validate().is_ok());
        match entry {
            Entry::Trace(trace) => assert_eq!(trace.level, TraceLevel::Warn),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_trace_properties_must_be_object() {
        let mut entry = TraceEntry::new(TraceLevel::Error, "boom");
        entry.properties = Some("[1,2]".to_string());
        assert!(matches!(entry.validate(), Err(Error::InvalidEntry(_))));
        entry.properties = Some("{not json".to_string());
        assert!(matches!(entry.validate(), Err(Error::Json(_))));
        entry.properties = Some(r#"{"attempt":2}"#.to_string());
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_blank_trace_correlation_dropped() {
        let entry = TraceEntry::new(TraceLevel::Info, "ready")
            .with_correlation_id(CorrelationId::from("  "));
        assert!(entry.correlation_id.is_none());
        let entry = entry.with_correlation_id(CorrelationId::from("op-1"));
        assert_eq!(entry.correlation_id.map(|c| c.0).as_deref(), Some("op-1"));
    }

    #[test]
    fn test_trace_levels_order_by_verbosity() {
        assert!(TraceLevel::Trace < TraceLevel::Debug);
        assert!(TraceLevel::Warn < TraceLevel::Error);
        assert_eq!(TraceLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_host_tags_use_thread_name() {
        let tags = std::thread::Builder::new()
            .name("ingest-3".to_string())
            .spawn(|| Tags::default().with_host("web-01"))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(tags.machine_name.as_deref(), Some("web-01"));
        assert_eq!(tags.thread_id.as_deref(), Some("ingest-3"));

        let unnamed = std::thread::spawn(thread_label).join().unwrap();
        assert!(unnamed.parse::<u64>().is_ok(), "{unnamed}");
    }

    #[test]
    fn test_blank_address_invalid() {
        assert!("  ".to_string().validate().is_err());
        assert!("192.0.2.1".to_string().validate().is_ok());
    }

    #[test]
    fn test_unresolved_location() {
        let record = LocationRecord::unresolved("192.0.2.1");
        assert!(!record.is_resolved());
        assert!(record.validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_timing_valid_only_when_ordered(start in 0i64..100_000, end in 0i64..100_000) {
            let entry = LogEntry::new(
                "cmd-1",
                "AddItem",
                CorrelationId::new(),
                Timing::between(ts(start), ts(end)),
                Outcome::success(),
            );
            prop_assert_eq!(entry.validate().is_ok(), end >= start);
            if end >= start {
                prop_assert_eq!(entry.elapsed().as_secs() as i64, end - start);
            }
        }
    }
}
