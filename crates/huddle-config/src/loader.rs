//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::HuddleConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load full Huddle configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<HuddleConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: HuddleConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &HuddleConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.runtime.buffer_window_ms == 0 {
        return Err(ConfigError::Invalid(
            "runtime.buffer_window_ms must be > 0".to_string(),
        ));
    }

    if config.runtime.artifact_inline_threshold == 0 {
        return Err(ConfigError::Invalid(
            "runtime.artifact_inline_threshold must be > 0".to_string(),
        ));
    }

    if config.runtime.max_call_depth == 0 {
        return Err(ConfigError::Invalid(
            "runtime.max_call_depth must be > 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_window() {
        let config: HuddleConfig =
            serde_yaml::from_str("runtime:\n  buffer_window_ms: 0\n").expect("parse");
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate_config(&HuddleConfig::default()).is_ok());
    }
}
