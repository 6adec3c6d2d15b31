//! Audit log pipeline configuration loading and validation.
//!
//! This crate provides:
//! - Typed pipeline options with defaults (batching, tables, destination, enrichment, trace level)
//! - Config resolution (explicit path → `AUDITLOG_CONFIG` → defaults, then env overrides)
//! - Semantic validation reporting every problem at once

pub mod options;
pub mod resolve;
pub mod validate;

pub use options::{
    Destination, DestinationKind, FailurePolicy, LocationOptions, LogFormat, LoggingOptions,
    PipelineConfig, TableNames,
};
pub use resolve::{resolve_config, ENV_CONFIG_PATH};
pub use validate::{ConfigError, ValidationResult};
