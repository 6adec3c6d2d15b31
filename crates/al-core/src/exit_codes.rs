//! Exit codes for the auditlog CLI.
//!
//! Exit codes communicate operation outcome without requiring output parsing.

use crate::pipeline::PipelineError;
use al_config::ConfigError;
use al_telemetry::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    /// Configuration error
    ConfigError = 10,

    /// Destination (sink) error
    SinkError = 11,

    /// I/O error (input file, output stream)
    IoError = 13,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&ConfigError> for ExitCode {
    fn from(err: &ConfigError) -> Self {
        match err {
            ConfigError::IoError(_) => ExitCode::IoError,
            _ => ExitCode::ConfigError,
        }
    }
}

impl From<&SinkError> for ExitCode {
    fn from(err: &SinkError) -> Self {
        match err {
            SinkError::Io(_) => ExitCode::IoError,
            _ => ExitCode::SinkError,
        }
    }
}

impl From<&PipelineError> for ExitCode {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Config(e) => e.into(),
            PipelineError::Schema(_) => ExitCode::ConfigError,
            PipelineError::Sink(e) => e.into(),
            PipelineError::Accumulator(_) => ExitCode::InternalError,
        }
    }
}
