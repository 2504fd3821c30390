//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;

    tracing::info!(
        path = %path.display(),
        services = config.breakers.services.len(),
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config(
            r#"
            [observability]
            log_format = "json"

            [breakers.default]
            failure_threshold = 4

            [breakers.ai_service]
            execution_timeout_ms = 45000
            open_timeout_ms = 120000
            "#,
        )
        .unwrap();

        assert_eq!(config.observability.log_format, crate::config::LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.breakers.default.failure_threshold, 4);

        let ai = config.breakers.settings_for("ai_service");
        assert_eq!(ai.execution_timeout_ms, 45_000);
        assert_eq!(ai.open_timeout_ms, 120_000);
        // named sections use built-in defaults, not [breakers.default]
        assert_eq!(ai.failure_threshold, 5);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = parse_config("").unwrap();
        assert!(config.breakers.services.is_empty());
        assert_eq!(config.breakers.default, crate::config::BreakerSettings::default());
    }

    #[test]
    fn test_validation_errors_surface() {
        let err = parse_config("[breakers.cache]\nfailure_threshold = 0\n").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "breakers.cache.failure_threshold");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        assert!(matches!(parse_config("[breakers"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[breakers.database]\nfailure_threshold = 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.breakers.settings_for("database").failure_threshold, 2);

        let missing = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
