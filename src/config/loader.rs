//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `upstream.endpoint`.
pub const ENV_UPSTREAM: &str = "FEED_RELAY_UPSTREAM";
/// Environment variable overriding `listener.bind_address`.
pub const ENV_BIND: &str = "FEED_RELAY_BIND";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, then validate.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => RelayConfig::default(),
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Parse TOML text into a configuration without validating it.
pub fn parse_config(content: &str) -> Result<RelayConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Overlay environment-supplied values on a configuration.
pub fn apply_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = lookup(ENV_UPSTREAM).filter(|v| !v.is_empty()) {
        config.upstream.endpoint = endpoint;
    }
    if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.is_empty()) {
        config.listener.bind_address = bind;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::io::Write;

    #[test]
    fn parse_partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [upstream]
            endpoint = "tcp://backend-cpp:5555"
            backoff_factor = 2.0

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.endpoint, "tcp://backend-cpp:5555");
        assert_eq!(config.upstream.backoff_factor, 2.0);
        assert_eq!(config.upstream.backoff_base_ms, 1000);
        assert_eq!(config.listener.ws_path, "/ws");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn parse_rejects_bad_types() {
        let err = parse_config("[broadcast]\nqueue_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = RelayConfig::default();
        apply_overrides(&mut config, |key| match key {
            ENV_UPSTREAM => Some("tcp://engine:6000".to_string()),
            ENV_BIND => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.upstream.endpoint, "tcp://engine:6000");
        assert_eq!(config.listener.bind_address, "0.0.0.0:8001");
    }

    #[test]
    fn load_reports_validation_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nws_path = \"ws\"").unwrap();

        match load_config(Some(file.path())) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field == "listener.ws_path"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
