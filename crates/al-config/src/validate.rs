//! Configuration errors and semantic validation.

use crate::options::PipelineConfig;
use thiserror::Error;

pub type ValidationResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl From<ConfigError> for al_common::Error {
    fn from(err: ConfigError) -> Self {
        al_common::Error::Config(err.to_string())
    }
}

const MIN_FLUSH_PERIOD_MS: u64 = 10;

impl PipelineConfig {
    /// Check semantic constraints, collecting every problem found.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut problems = Vec::new();

        if self.batch_size == 0 {
            problems.push("batch_size must be at least 1".to_string());
        }
        if self.flush_period_ms < MIN_FLUSH_PERIOD_MS {
            problems.push(format!(
                "flush_period_ms must be at least {} (got {})",
                MIN_FLUSH_PERIOD_MS, self.flush_period_ms
            ));
        }

        let names = self.tables.entries();
        for (i, (key, name)) in names.iter().enumerate() {
            if name.trim().is_empty() {
                problems.push(format!("tables.{} must not be blank", key));
                continue;
            }
            if let Some((other, _)) = names[..i]
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(name))
            {
                problems.push(format!(
                    "tables.{} duplicates tables.{} ({:?})",
                    key, other, name
                ));
            }
        }

        if self.locations.enabled {
            if !self.locations.endpoint.contains("{address}") {
                problems.push("locations.endpoint must contain {address}".to_string());
            }
            if self.locations.timeout_ms == 0 {
                problems.push("locations.timeout_ms must be positive".to_string());
            }
        }

        if let crate::FailurePolicy::Retry { max_retries: 0, .. } = self.failure_policy {
            problems.push("failure_policy.max_retries must be at least 1 for retry".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_reports_every_problem() {
        let mut config = PipelineConfig::default();
        config.batch_size = 0;
        config.flush_period_ms = 1;
        config.tables.logs = "audits".to_string();
        config.locations.enabled = true;
        config.locations.endpoint = "http://geo.local/lookup".to_string();

        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 4, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("tables.logs duplicates tables.audits")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_trace_table_must_be_distinct() {
        let mut config = PipelineConfig::default();
        config.tables.traces = "LOGS".to_string();
        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems, vec!["tables.traces duplicates tables.logs (\"LOGS\")"]);
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_ignored_when_disabled() {
        let mut config = PipelineConfig::default();
        config.locations.endpoint = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_converts_to_common_error() {
        let err: al_common::Error = ConfigError::ParseError("bad".to_string()).into();
        assert_eq!(err.code(), 20);
    }
}
