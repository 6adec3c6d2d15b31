//! Structured logging setup.

use crate::trace_layer::{tracing_level, TraceLayer};
use al_config::LogFormat;
use tracing::Subscriber;
use tracing_subscriber::filter::{Filtered, LevelFilter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber. Console output goes to stderr so command
/// output on stdout stays machine-readable.
///
/// `RUST_LOG` wins over `level` when set. It only filters the console; the
/// trace layer keeps its own minimum level. Fails if a subscriber is already
/// installed.
pub fn init_logging(
    level: &str,
    format: LogFormat,
    traces: Option<TraceLayer>,
) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry();

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter),
            )
            .with(traces.map(filtered))
            .try_init(),
        LogFormat::Human => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter),
            )
            .with(traces.map(filtered))
            .try_init(),
    }
}

/// Trace layer behind a level filter matching its minimum.
pub fn filtered<S>(layer: TraceLayer) -> Filtered<TraceLayer, LevelFilter, S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let filter = LevelFilter::from_level(tracing_level(layer.min_level()));
    layer.with_filter(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{Accumulator, BatchSettings, FlushError};
    use crate::clock::ManualClock;
    use al_common::{TraceEntry, TraceLevel};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_level_names_are_valid_filters() {
        for level in ["error", "warn", "info", "debug", "trace", "al_core=debug,info"] {
            assert!(EnvFilter::try_new(level).is_ok(), "{level} should parse");
        }
    }

    #[test]
    fn test_filtered_trace_layer_beside_console_filter() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handler = move |batch: &[TraceEntry]| -> Result<(), FlushError> {
            let _ = tx.send(batch.to_vec());
            Ok(())
        };
        let traces = Arc::new(
            Accumulator::spawn(
                "traces",
                BatchSettings::new(100, Duration::from_secs(60)),
                handler,
                Arc::new(ManualClock::new()),
            )
            .expect("spawn"),
        );
        let layer = TraceLayer::new(TraceLevel::Debug, "web-01");
        layer.handle().attach(Arc::clone(&traces));

        // The console only shows errors; traces still receive debug events.
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::sink).with_filter(EnvFilter::new("error")))
            .with(filtered(layer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!(target: "shop", "too verbose");
            tracing::debug!(target: "shop", "cache miss");
        });
        traces.flush();

        let batch = rx.try_recv().expect("trace batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].level, TraceLevel::Debug);
        assert_eq!(batch[0].message, "cache miss");
    }
}
