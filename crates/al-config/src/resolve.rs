//! Configuration resolution.
//!
//! Order: explicit path → `AUDITLOG_CONFIG` → built-in defaults, then the
//! `AUDITLOG_*` environment overrides are applied on top. The result is
//! validated before it is returned.

use crate::options::{DestinationKind, PipelineConfig};
use crate::validate::{ConfigError, ValidationResult};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const ENV_CONFIG_PATH: &str = "AUDITLOG_CONFIG";

const ENV_BATCH_SIZE: &str = "AUDITLOG_BATCH_SIZE";
const ENV_FLUSH_PERIOD_MS: &str = "AUDITLOG_FLUSH_PERIOD_MS";
const ENV_DESTINATION: &str = "AUDITLOG_DESTINATION";
const ENV_DESTINATION_PATH: &str = "AUDITLOG_DESTINATION_PATH";
const ENV_LOCATIONS_ENABLED: &str = "AUDITLOG_LOCATIONS_ENABLED";
const ENV_LOG_LEVEL: &str = "AUDITLOG_LOG_LEVEL";

/// Resolve configuration from the process environment.
pub fn resolve_config(explicit: Option<&Path>) -> ValidationResult<PipelineConfig> {
    resolve_with_env(explicit, |key| std::env::var(key).ok())
}

/// Resolve configuration using `env` as the variable source.
pub fn resolve_with_env<F>(explicit: Option<&Path>, env: F) -> ValidationResult<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env(ENV_CONFIG_PATH).filter(|p| !p.trim().is_empty()).map(PathBuf::from));

    let mut config = match path {
        Some(path) => load_file(&path)?,
        None => PipelineConfig::default(),
    };

    apply_env_overrides(&mut config, &env)?;
    config.validate()?;
    Ok(config)
}

/// Load a config file. `.json` files are parsed as JSON, anything else as TOML.
pub fn load_file(path: &Path) -> ValidationResult<PipelineConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::IoError(format!("Failed to read {}: {}", path.display(), e))
    })?;

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => PipelineConfig::from_json(&content),
        _ => PipelineConfig::from_toml(&content),
    }
}

fn apply_env_overrides<F>(config: &mut PipelineConfig, env: &F) -> ValidationResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(ENV_BATCH_SIZE) {
        config.batch_size = parse_env(ENV_BATCH_SIZE, &value)?;
    }
    if let Some(value) = env(ENV_FLUSH_PERIOD_MS) {
        config.flush_period_ms = parse_env(ENV_FLUSH_PERIOD_MS, &value)?;
    }
    if let Some(value) = env(ENV_DESTINATION) {
        config.destination.kind = match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => DestinationKind::Sqlite,
            "parquet" => DestinationKind::Parquet,
            "memory" => DestinationKind::Memory,
            _ => return Err(invalid(ENV_DESTINATION, &value)),
        };
    }
    if let Some(value) = env(ENV_DESTINATION_PATH) {
        config.destination.path = PathBuf::from(value);
    }
    if let Some(value) = env(ENV_LOCATIONS_ENABLED) {
        config.locations.enabled = parse_bool(ENV_LOCATIONS_ENABLED, &value)?;
    }
    if let Some(value) = env(ENV_LOG_LEVEL) {
        config.logging.level = value;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> ValidationResult<T> {
    value.trim().parse().map_err(|_| invalid(var, value))
}

fn parse_bool(var: &str, value: &str) -> ValidationResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value)),
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = resolve_with_env(None, env_of(&[])).expect("resolve");
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::with_suffix(".toml").expect("tempfile");
        writeln!(file, "batch_size = 20\nflush_period_ms = 1000").expect("write");

        let config = resolve_with_env(
            Some(file.path()),
            env_of(&[
                (ENV_BATCH_SIZE, "50"),
                (ENV_LOCATIONS_ENABLED, "yes"),
                (ENV_DESTINATION, "memory"),
            ]),
        )
        .expect("resolve");

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.flush_period_ms, 1000);
        assert!(config.locations.enabled);
        assert_eq!(config.destination.kind, DestinationKind::Memory);
    }

    #[test]
    fn test_config_path_from_env() {
        let mut file = NamedTempFile::with_suffix(".json").expect("tempfile");
        write!(file, r#"{{"tables": {{"audits": "AuditEvents"}}}}"#).expect("write");
        let path = file.path().to_string_lossy().to_string();

        let config =
            resolve_with_env(None, env_of(&[(ENV_CONFIG_PATH, path.as_str())])).expect("resolve");
        assert_eq!(config.tables.audits, "AuditEvents");
    }

    #[test]
    fn test_bad_env_value() {
        let err = resolve_with_env(None, env_of(&[(ENV_BATCH_SIZE, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = resolve_with_env(Some(Path::new("/nonexistent/auditlog.toml")), env_of(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_overrides_are_validated() {
        let err = resolve_with_env(None, env_of(&[(ENV_BATCH_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
