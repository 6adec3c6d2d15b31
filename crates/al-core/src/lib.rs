//! Audit log pipeline core.
//!
//! This crate provides:
//! - The batch accumulator (append surface, threshold/timer scheduling, drain on shutdown)
//! - The clock abstraction driving accumulator timers
//! - Location enrichment (resolver, cache, enrichment accumulator)
//! - Pipeline assembly over a bulk sink
//! - Logging setup, the trace-table layer, and CLI exit codes

pub mod accumulator;
pub mod clock;
pub mod enrichment;
pub mod exit_codes;
pub mod logging;
pub mod pipeline;
pub mod trace_layer;
pub mod writer;

pub use accumulator::{
    Accumulator, AccumulatorError, AccumulatorState, AccumulatorStats, BatchHandler,
    BatchSettings, FlushError,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use enrichment::{
    GeoResolver, HttpGeoResolver, LocationCache, LocationPipe, ResolveError, StaticResolver,
};
pub use exit_codes::ExitCode;
pub use logging::init_logging;
pub use pipeline::{open_sink, PipelineBuilder, PipelineError, PipelineStats, Schemas, TelemetryPipeline};
pub use trace_layer::{TraceHandle, TraceLayer};
pub use writer::TableWriter;
