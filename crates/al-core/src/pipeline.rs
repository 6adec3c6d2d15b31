//! Pipeline assembly.
//!
//! One accumulator per entry type, all writing through a shared sink, plus
//! the optional location pipe fed by the address-bearing ones. Shutdown drains
//! the primary and trace accumulators first so their final addresses still
//! reach the location pipe, then drains the location pipe.

use crate::accumulator::{Accumulator, AccumulatorError, AccumulatorStats, BatchSettings};
use crate::clock::{Clock, SystemClock};
use crate::enrichment::{GeoResolver, HttpGeoResolver, LocationPipe};
use crate::writer::TableWriter;
use al_common::{
    AuditEntry, Entry, LocationRecord, LogEntry, RequestEntry, ResponseEntry, TraceEntry,
};
use al_config::{ConfigError, Destination, DestinationKind, PipelineConfig, TableNames};
use al_telemetry::{
    BulkSink, MemorySink, ParquetSink, Record, SchemaError, SinkError, SqliteSink, TableSchema,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),
}

/// Table descriptors for every entry type.
#[derive(Debug, Clone)]
pub struct Schemas {
    pub audits: TableSchema,
    pub logs: TableSchema,
    pub requests: TableSchema,
    pub responses: TableSchema,
    pub traces: TableSchema,
    pub locations: TableSchema,
}

impl Schemas {
    pub fn from_tables(tables: &TableNames) -> Self {
        Self {
            audits: AuditEntry::schema(&tables.audits),
            logs: LogEntry::schema(&tables.logs),
            requests: RequestEntry::schema(&tables.requests),
            responses: ResponseEntry::schema(&tables.responses),
            traces: TraceEntry::schema(&tables.traces),
            locations: LocationRecord::schema(&tables.locations),
        }
    }

    pub fn all(&self) -> [&TableSchema; 6] {
        [
            &self.audits,
            &self.logs,
            &self.requests,
            &self.responses,
            &self.traces,
            &self.locations,
        ]
    }

    /// Find a schema by table name or by its option key (`audits`, `logs`, ...).
    pub fn find(&self, name: &str) -> Option<&TableSchema> {
        let keyed = match name.to_ascii_lowercase().as_str() {
            "audits" => Some(&self.audits),
            "logs" => Some(&self.logs),
            "requests" => Some(&self.requests),
            "responses" => Some(&self.responses),
            "traces" => Some(&self.traces),
            "locations" => Some(&self.locations),
            _ => None,
        };
        keyed.or_else(|| {
            self.all()
                .into_iter()
                .find(|s| s.table.eq_ignore_ascii_case(name))
        })
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        self.all().into_iter().try_for_each(TableSchema::validate)
    }
}

/// Open the sink named by the destination options.
pub fn open_sink(destination: &Destination) -> Result<Arc<dyn BulkSink>, SinkError> {
    let sink: Arc<dyn BulkSink> = match destination.kind {
        DestinationKind::Sqlite => Arc::new(SqliteSink::open(&destination.path)?),
        DestinationKind::Parquet => Arc::new(ParquetSink::new(&destination.path)?),
        DestinationKind::Memory => Arc::new(MemorySink::new()),
    };
    Ok(sink)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub audits: AccumulatorStats,
    pub logs: AccumulatorStats,
    pub requests: AccumulatorStats,
    pub responses: AccumulatorStats,
    pub traces: AccumulatorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<AccumulatorStats>,
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    sink: Option<Arc<dyn BulkSink>>,
    resolver: Option<Arc<dyn GeoResolver>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sink: None,
            resolver: None,
            clock: None,
        }
    }

    /// Write through `sink` instead of opening the configured destination.
    pub fn with_sink(mut self, sink: Arc<dyn BulkSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn start(self) -> Result<TelemetryPipeline, PipelineError> {
        let config = self.config;
        config.validate()?;

        let schemas = Schemas::from_tables(&config.tables);
        schemas.validate()?;

        let sink = match self.sink {
            Some(sink) => sink,
            None => open_sink(&config.destination)?,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let settings = BatchSettings::from_config(&config);

        if config.create_tables {
            for schema in schemas.all() {
                if schema == &schemas.locations && !config.locations.enabled {
                    continue;
                }
                sink.ensure_table(schema)?;
            }
        }

        let locations = if config.locations.enabled {
            let resolver = self.resolver.unwrap_or_else(|| {
                Arc::new(HttpGeoResolver::new(
                    config.locations.endpoint.clone(),
                    Duration::from_millis(config.locations.timeout_ms),
                )) as Arc<dyn GeoResolver>
            });
            Some(Arc::new(LocationPipe::start(
                Arc::clone(&sink),
                schemas.locations.clone(),
                resolver,
                settings,
                Arc::clone(&clock),
            )?))
        } else {
            None
        };

        let audits = Accumulator::spawn(
            "audits",
            settings,
            table_writer::<AuditEntry>(&sink, &schemas.audits, &locations),
            Arc::clone(&clock),
        )?;
        // Command logs carry no source address.
        let logs = Accumulator::spawn(
            "logs",
            settings,
            TableWriter::<LogEntry>::new(Arc::clone(&sink), schemas.logs.clone()),
            Arc::clone(&clock),
        )?;
        let requests = Accumulator::spawn(
            "requests",
            settings,
            table_writer::<RequestEntry>(&sink, &schemas.requests, &locations),
            Arc::clone(&clock),
        )?;
        let responses = Accumulator::spawn(
            "responses",
            settings,
            table_writer::<ResponseEntry>(&sink, &schemas.responses, &locations),
            Arc::clone(&clock),
        )?;
        let traces = Arc::new(Accumulator::spawn(
            "traces",
            settings,
            table_writer::<TraceEntry>(&sink, &schemas.traces, &locations),
            Arc::clone(&clock),
        )?);

        info!(
            sink = sink.name(),
            batch_size = settings.batch_size,
            flush_period_ms = config.flush_period_ms,
            locations = locations.is_some(),
            "pipeline started"
        );

        Ok(TelemetryPipeline {
            audits,
            logs,
            requests,
            responses,
            traces,
            locations,
            sink,
            schemas,
        })
    }
}

fn table_writer<R: Record>(
    sink: &Arc<dyn BulkSink>,
    schema: &TableSchema,
    locations: &Option<Arc<LocationPipe>>,
) -> TableWriter<R> {
    let writer = TableWriter::new(Arc::clone(sink), schema.clone());
    match locations {
        Some(pipe) => writer.with_locations(Arc::clone(pipe)),
        None => writer,
    }
}

/// Append surface for all entry types.
pub struct TelemetryPipeline {
    audits: Accumulator<AuditEntry>,
    logs: Accumulator<LogEntry>,
    requests: Accumulator<RequestEntry>,
    responses: Accumulator<ResponseEntry>,
    traces: Arc<Accumulator<TraceEntry>>,
    locations: Option<Arc<LocationPipe>>,
    sink: Arc<dyn BulkSink>,
    schemas: Schemas,
}

impl TelemetryPipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn append(&self, entry: Entry) -> Result<(), AccumulatorError> {
        match entry {
            Entry::Audit(e) => self.append_audit(e),
            Entry::Log(e) => self.append_log(e),
            Entry::Request(e) => self.append_request(e),
            Entry::Response(e) => self.append_response(e),
            Entry::Trace(e) => self.append_trace(e),
        }
    }

    pub fn append_audit(&self, entry: AuditEntry) -> Result<(), AccumulatorError> {
        self.audits.append(entry)
    }

    pub fn append_log(&self, entry: LogEntry) -> Result<(), AccumulatorError> {
        self.logs.append(entry)
    }

    pub fn append_request(&self, entry: RequestEntry) -> Result<(), AccumulatorError> {
        self.requests.append(entry)
    }

    pub fn append_response(&self, entry: ResponseEntry) -> Result<(), AccumulatorError> {
        self.responses.append(entry)
    }

    pub fn append_trace(&self, entry: TraceEntry) -> Result<(), AccumulatorError> {
        self.traces.append(entry)
    }

    /// Shared handle to the trace accumulator, for [`crate::TraceLayer`].
    pub fn traces(&self) -> Arc<Accumulator<TraceEntry>> {
        Arc::clone(&self.traces)
    }

    /// Flush every accumulator and wait for the writes, locations last.
    pub fn flush(&self) {
        self.audits.flush();
        self.logs.flush();
        self.requests.flush();
        self.responses.flush();
        self.traces.flush();
        if let Some(pipe) = &self.locations {
            pipe.flush();
        }
    }

    /// Drain and stop every accumulator. Safe to call more than once.
    pub fn shutdown(&self) {
        self.audits.shutdown();
        self.logs.shutdown();
        self.requests.shutdown();
        self.responses.shutdown();
        self.traces.shutdown();
        if let Some(pipe) = &self.locations {
            pipe.shutdown();
        }
        info!(sink = self.sink.name(), "pipeline stopped");
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            audits: self.audits.stats(),
            logs: self.logs.stats(),
            requests: self.requests.stats(),
            responses: self.responses.stats(),
            traces: self.traces.stats(),
            locations: self.locations.as_ref().map(|p| p.stats()),
        }
    }

    pub fn schemas(&self) -> &Schemas {
        &self.schemas
    }

    pub fn sink(&self) -> &Arc<dyn BulkSink> {
        &self.sink
    }

    pub fn locations(&self) -> Option<&Arc<LocationPipe>> {
        self.locations.as_ref()
    }
}

impl Drop for TelemetryPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
