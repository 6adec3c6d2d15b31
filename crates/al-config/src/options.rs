//! Pipeline option types.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! usable configuration.

use al_common::TraceLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffered items that trigger an immediate flush.
    pub batch_size: usize,

    /// Maximum time between flushes, in milliseconds.
    pub flush_period_ms: u64,

    pub tables: TableNames,

    /// Create missing tables at startup.
    pub create_tables: bool,

    pub locations: LocationOptions,

    pub destination: Destination,

    pub failure_policy: FailurePolicy,

    pub logging: LoggingOptions,

    /// Least severe diagnostic event stored in the trace table.
    pub trace_level: TraceLevel,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_period_ms: 5_000,
            tables: TableNames::default(),
            create_tables: true,
            locations: LocationOptions::default(),
            destination: Destination::default(),
            failure_policy: FailurePolicy::default(),
            logging: LoggingOptions::default(),
            trace_level: TraceLevel::Warn,
        }
    }
}

impl PipelineConfig {
    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }

    /// Parse from TOML text.
    pub fn from_toml(text: &str) -> crate::ValidationResult<Self> {
        toml::from_str(text)
            .map_err(|e| crate::ConfigError::ParseError(format!("Invalid TOML: {}", e)))
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> crate::ValidationResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::ConfigError::ParseError(format!("Invalid JSON: {}", e)))
    }
}

/// Destination table name per entry type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub audits: String,
    pub logs: String,
    pub requests: String,
    pub responses: String,
    pub traces: String,
    pub locations: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            audits: "Audits".to_string(),
            logs: "Logs".to_string(),
            requests: "Requests".to_string(),
            responses: "Responses".to_string(),
            traces: "Traces".to_string(),
            locations: "Locations".to_string(),
        }
    }
}

impl TableNames {
    /// All names paired with the option key they came from.
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("audits", &self.audits),
            ("logs", &self.logs),
            ("requests", &self.requests),
            ("responses", &self.responses),
            ("traces", &self.traces),
            ("locations", &self.locations),
        ]
    }
}

/// Geo-location enrichment switch and resolver endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationOptions {
    pub enabled: bool,

    /// URL template; `{address}` is replaced with the address being resolved.
    pub endpoint: String,

    pub timeout_ms: u64,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://ip-api.com/json/{address}".to_string(),
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    #[default]
    Sqlite,
    Parquet,
    Memory,
}

/// Where batches are written. For SQLite the path is the database file; for
/// Parquet it is the root directory holding one directory per table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Destination {
    pub kind: DestinationKind,
    pub path: PathBuf,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            kind: DestinationKind::Sqlite,
            path: PathBuf::from("auditlog.db"),
        }
    }
}

/// What an accumulator does when a batch write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and drop the batch.
    #[default]
    Discard,
    /// Retry the same batch, waiting `backoff_ms * attempt` between tries,
    /// then drop it once retries are exhausted.
    Retry { max_retries: u32, backoff_ms: u64 },
}

impl FailurePolicy {
    pub fn max_retries(&self) -> u32 {
        match self {
            FailurePolicy::Discard => 0,
            FailurePolicy::Retry { max_retries, .. } => *max_retries,
        }
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        match self {
            FailurePolicy::Discard => Duration::ZERO,
            FailurePolicy::Retry { backoff_ms, .. } => {
                Duration::from_millis(backoff_ms.saturating_mul(u64::from(attempt)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.flush_period(), Duration::from_secs(5));
        assert_eq!(config.tables.requests, "Requests");
        assert!(config.create_tables);
        assert!(!config.locations.enabled);
        assert_eq!(config.failure_policy, FailurePolicy::Discard);
        assert_eq!(config.tables.traces, "Traces");
        assert_eq!(config.trace_level, TraceLevel::Warn);
    }

    #[test]
    fn test_trace_level_accepts_warning_alias() {
        let config = PipelineConfig::from_toml("trace_level = \"warning\"").expect("parse");
        assert_eq!(config.trace_level, TraceLevel::Warn);
        let config = PipelineConfig::from_json(r#"{"trace_level": "debug"}"#).expect("parse");
        assert_eq!(config.trace_level, TraceLevel::Debug);
        assert!(PipelineConfig::from_toml("trace_level = \"loud\"").is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
batch_size = 250

[tables]
audits = "AuditTrail"

[failure_policy]
mode = "retry"
max_retries = 3
backoff_ms = 200
"#,
        )
        .expect("parse");
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.flush_period_ms, 5_000);
        assert_eq!(config.tables.audits, "AuditTrail");
        assert_eq!(config.tables.logs, "Logs");
        assert_eq!(config.failure_policy.max_retries(), 3);
        assert_eq!(
            config.failure_policy.backoff(2),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn test_json_destination() {
        let config = PipelineConfig::from_json(
            r#"{"destination": {"kind": "parquet", "path": "/var/lib/auditlog"}}"#,
        )
        .expect("parse");
        assert_eq!(config.destination.kind, DestinationKind::Parquet);
        assert_eq!(config.destination.path, PathBuf::from("/var/lib/auditlog"));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = PipelineConfig::from_toml("batch_size = \"many\"").unwrap_err();
        assert!(matches!(err, crate::ConfigError::ParseError(_)));
    }

    #[test]
    fn test_discard_has_no_backoff() {
        assert_eq!(FailurePolicy::Discard.backoff(3), Duration::ZERO);
        assert_eq!(FailurePolicy::Discard.max_retries(), 0);
    }
}
