//! auditlog CLI entry point.

use al_common::Entry;
use al_config::{resolve_config, DestinationKind, LogFormat, PipelineConfig};
use al_core::exit_codes::ExitCode;
use al_core::pipeline::{open_sink, Schemas, TelemetryPipeline};
use al_core::trace_layer::{machine_name, TraceHandle, TraceLayer};
use al_core::{init_logging, AccumulatorError};
use al_telemetry::{RowQuery, SqliteSink, DEFAULT_SELECT_LIMIT};
use chrono::DateTime;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

#[derive(Parser, Debug)]
#[command(name = "auditlog", version, about = "Write-behind audit and telemetry ingestion")]
struct Cli {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Write to an in-memory sink instead of the configured destination
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read JSON-lines entries and write them through the pipeline
    Ingest {
        /// Input file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Producer threads appending entries
        #[arg(long, default_value_t = 1)]
        threads: usize,
    },

    /// Create every configured table that does not exist yet
    InitTables,

    /// Print stored rows as JSON lines, newest first (SQLite only)
    Query {
        /// Table name or key (audits, logs, requests, responses, traces, locations)
        table: String,

        #[arg(long, default_value_t = DEFAULT_SELECT_LIMIT)]
        limit: usize,

        /// RFC 3339 lower bound (inclusive)
        #[arg(long)]
        since: Option<String>,

        /// RFC 3339 upper bound (exclusive)
        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        application: Option<String>,

        #[arg(long)]
        environment: Option<String>,
    },

    /// Print the resolved configuration
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
    Human,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Human => LogFormat::Human,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Error surfaced to `main` with the exit code it maps to.
struct Failure {
    code: ExitCode,
    message: String,
}

impl Failure {
    fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => ExitCode::Clean,
        Err(failure) => {
            error!(code = failure.code.as_i32(), "{}", failure.message);
            eprintln!("auditlog: {}", failure.message);
            failure.code
        }
    };
    std::process::exit(code.as_i32());
}

fn run(cli: Cli) -> Result<(), Failure> {
    let mut config = resolve_config(cli.config.as_deref())
        .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    if cli.dry_run {
        config.destination.kind = DestinationKind::Memory;
    }

    let trace_layer = TraceLayer::new(config.trace_level, machine_name());
    let traces = trace_layer.handle();
    if let Err(e) = init_logging(&config.logging.level, config.logging.format, Some(trace_layer)) {
        eprintln!("auditlog: logging unavailable: {}", e);
    }

    match cli.command {
        Command::Ingest { input, threads } => ingest(config, input, threads, &traces),
        Command::InitTables => init_tables(&config),
        Command::Query {
            table,
            limit,
            since,
            until,
            application,
            environment,
        } => {
            let mut query = RowQuery::default()
                .with_limit(limit)
                .between(parse_ts(since.as_deref())?, parse_ts(until.as_deref())?);
            query.application = application;
            query.environment = environment;
            run_query(&config, &table, &query)
        }
        Command::Config => print_json(&config),
    }
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    read: u64,
    rejected: u64,
    appended: u64,
    stats: al_core::PipelineStats,
}

fn ingest(
    config: PipelineConfig,
    input: Option<PathBuf>,
    threads: usize,
    traces: &TraceHandle,
) -> Result<(), Failure> {
    let reader: Box<dyn BufRead + Send> = match &input {
        Some(path) => Box::new(BufReader::new(File::open(path).map_err(|e| {
            Failure::new(
                ExitCode::IoError,
                format!("cannot open {}: {}", path.display(), e),
            )
        })?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let pipeline = TelemetryPipeline::builder(config)
        .start()
        .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;
    traces.attach(pipeline.traces());

    let read = AtomicU64::new(0);
    let rejected = AtomicU64::new(0);
    let appended = AtomicU64::new(0);
    let (tx, rx) = crossbeam_channel::bounded::<(u64, String)>(1024);
    let mut io_error = None;

    std::thread::scope(|scope| {
        for _ in 0..threads.max(1) {
            let rx = rx.clone();
            let pipeline = &pipeline;
            let (rejected, appended) = (&rejected, &appended);
            scope.spawn(move || {
                for (line_no, line) in rx {
                    match Entry::from_json_line(&line) {
                        Ok(entry) => match pipeline.append(entry) {
                            Ok(()) => {
                                appended.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(AccumulatorError::Invalid(e)) => {
                                warn!(line = line_no, error = %e, "rejected invalid entry");
                                rejected.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                warn!(line = line_no, error = %e, "append failed");
                                rejected.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        Err(e) => {
                            warn!(line = line_no, error = %e, "unparseable entry");
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
        drop(rx);

        for (i, line) in reader.lines().enumerate() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    read.fetch_add(1, Ordering::Relaxed);
                    if tx.send((i as u64 + 1, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    io_error = Some(e);
                    break;
                }
            }
        }
        drop(tx);
    });

    traces.detach();
    pipeline.shutdown();

    let summary = IngestSummary {
        read: read.into_inner(),
        rejected: rejected.into_inner(),
        appended: appended.into_inner(),
        stats: pipeline.stats(),
    };
    print_json(&summary)?;

    match io_error {
        Some(e) => Err(Failure::new(
            ExitCode::IoError,
            format!("reading input failed: {}", e),
        )),
        None => Ok(()),
    }
}

fn init_tables(config: &PipelineConfig) -> Result<(), Failure> {
    config
        .validate()
        .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;
    let schemas = Schemas::from_tables(&config.tables);
    let sink = open_sink(&config.destination)
        .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;

    let mut created = Vec::new();
    for schema in schemas.all() {
        if schema == &schemas.locations && !config.locations.enabled {
            continue;
        }
        sink.ensure_table(schema)
            .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;
        created.push(schema.table.clone());
    }
    print_json(&serde_json::json!({ "sink": sink.name(), "tables": created }))
}

fn run_query(config: &PipelineConfig, table: &str, query: &RowQuery) -> Result<(), Failure> {
    if config.destination.kind != DestinationKind::Sqlite {
        return Err(Failure::new(
            ExitCode::ConfigError,
            "query requires a sqlite destination",
        ));
    }
    let schemas = Schemas::from_tables(&config.tables);
    let schema = schemas
        .find(table)
        .ok_or_else(|| Failure::new(ExitCode::ConfigError, format!("unknown table {}", table)))?;

    let sink = SqliteSink::open(&config.destination.path)
        .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;
    let rows = sink
        .query(schema, query)
        .map_err(|e| Failure::new(ExitCode::from(&e), e.to_string()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in rows {
        let object: serde_json::Map<String, serde_json::Value> = schema
            .columns
            .iter()
            .zip(&row)
            .map(|(column, value)| (column.name.to_string(), value.to_json()))
            .collect();
        writeln!(out, "{}", serde_json::Value::Object(object))
            .map_err(|e| Failure::new(ExitCode::IoError, e.to_string()))?;
    }
    Ok(())
}

fn parse_ts(value: Option<&str>) -> Result<Option<al_common::Timestamp>, Failure> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v).map_err(|e| {
                Failure::new(ExitCode::ConfigError, format!("invalid timestamp {:?}: {}", v, e))
            })
        })
        .transpose()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Failure> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(ExitCode::InternalError, e.to_string()))?;
    println!("{}", text);
    Ok(())
}
