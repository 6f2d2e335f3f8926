//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ScanwireConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
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
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ScanwireConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ScanwireConfig, ConfigError> {
    let config: ScanwireConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_validation_error() {
        let err = parse_config(
            r#"
            [listener]
            bind_address = "nowhere"
            [timeouts]
            request_secs = 0
            "#,
        )
        .unwrap_err();
        let ConfigError::Validation(errors) = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(errors.len(), 2);
        assert!(err.to_string().contains("listener.bind_address"));
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        assert!(matches!(parse_config(r#"mode = "proxy""#), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/scanwire.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
