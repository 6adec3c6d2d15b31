//! Diagnostic events captured into the trace table.
//!
//! `TraceLayer` sits in the global subscriber next to the console output. It
//! is installed before the pipeline exists, so events are dropped until a
//! trace accumulator is attached through its [`TraceHandle`].

use crate::accumulator::Accumulator;
use al_common::{CorrelationId, Tags, TraceEntry, TraceLevel};
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Event targets never written to the trace table. Write failures are logged
/// under these and would otherwise feed back into the accumulator.
const INTERNAL_TARGETS: &[&str] = &["al_core", "al_telemetry", "ureq"];

type Slot = Arc<RwLock<Option<Arc<Accumulator<TraceEntry>>>>>;

/// Connects a [`TraceLayer`] to a running pipeline.
#[derive(Clone, Default)]
pub struct TraceHandle {
    slot: Slot,
}

impl TraceHandle {
    pub fn attach(&self, traces: Arc<Accumulator<TraceEntry>>) {
        *self.slot.write() = Some(traces);
    }

    pub fn detach(&self) {
        self.slot.write().take();
    }

    pub fn is_attached(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Appends every event at or above `min_level` to the attached trace
/// accumulator.
pub struct TraceLayer {
    min_level: TraceLevel,
    machine_name: String,
    tags: Tags,
    handle: TraceHandle,
}

impl TraceLayer {
    pub fn new(min_level: TraceLevel, machine_name: impl Into<String>) -> Self {
        Self {
            min_level,
            machine_name: machine_name.into(),
            tags: Tags::default(),
            handle: TraceHandle::default(),
        }
    }

    /// Application and environment tags stamped on every trace.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn min_level(&self) -> TraceLevel {
        self.min_level
    }

    pub fn handle(&self) -> TraceHandle {
        self.handle.clone()
    }

    fn accepts(&self, level: &Level, target: &str) -> bool {
        trace_level(level) >= self.min_level && !is_internal(target)
    }
}

impl<S: Subscriber> Layer<S> for TraceLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !self.accepts(meta.level(), meta.target()) {
            return;
        }
        let traces = match self.handle.slot.read().as_ref() {
            Some(traces) => Arc::clone(traces),
            None => return,
        };

        let mut fields = EventFields::default();
        event.record(&mut fields);
        let tags = self.tags.clone().with_host(self.machine_name.clone());
        let entry = fields.into_entry(trace_level(meta.level()), meta.target(), tags);

        // Closed pipelines and message-less events are dropped here; logging
        // the failure would re-enter this layer.
        let _ = traces.append(entry);
    }
}

pub fn trace_level(level: &Level) -> TraceLevel {
    match *level {
        Level::TRACE => TraceLevel::Trace,
        Level::DEBUG => TraceLevel::Debug,
        Level::INFO => TraceLevel::Info,
        Level::WARN => TraceLevel::Warn,
        _ => TraceLevel::Error,
    }
}

pub fn tracing_level(level: TraceLevel) -> Level {
    match level {
        TraceLevel::Trace => Level::TRACE,
        TraceLevel::Debug => Level::DEBUG,
        TraceLevel::Info => Level::INFO,
        TraceLevel::Warn => Level::WARN,
        TraceLevel::Error => Level::ERROR,
    }
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target
            .strip_prefix(internal)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// Local host name, `localhost` when it cannot be read.
pub fn machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    exception: Option<String>,
    correlation_id: Option<String>,
    source_address: Option<String>,
    session_id: Option<String>,
    user_name: Option<String>,
    properties: Map<String, Json>,
}

fn as_text(value: Json) -> String {
    match value {
        Json::String(s) => s,
        other => other.to_string(),
    }
}

impl EventFields {
    fn put(&mut self, field: &Field, value: Json) {
        match field.name() {
            "message" => self.message = Some(as_text(value)),
            "error" | "exception" => self.exception = Some(as_text(value)),
            "correlation_id" => self.correlation_id = Some(as_text(value)),
            "source_address" => self.source_address = Some(as_text(value)),
            "session_id" => self.session_id = Some(as_text(value)),
            "user_name" => self.user_name = Some(as_text(value)),
            name => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }

    fn into_entry(self, level: TraceLevel, target: &str, tags: Tags) -> TraceEntry {
        let mut entry = TraceEntry::new(level, self.message.unwrap_or_default()).with_tags(tags);
        if let Some(id) = self.correlation_id {
            entry = entry.with_correlation_id(CorrelationId::from(id.as_str()));
        }
        entry.target = Some(target.to_string());
        entry.exception = self.exception;
        if !self.properties.is_empty() {
            entry.properties = Some(Json::Object(self.properties).to_string());
        }
        entry.source_address = self.source_address;
        entry.session_id = self.session_id;
        entry.user_name = self.user_name;
        entry
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Json::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Json::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Json::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Json::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Json::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Json::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Json::from(format!("{:?}", value)));
    }
}
