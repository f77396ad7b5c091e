// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::KeelsonConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &KeelsonConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let url = config.engine.url.trim();
    if url.is_empty() {
        errors.push(ConfigError::Validation {
            message: "engine.url must not be empty".to_string(),
        });
    } else if url != ":memory:" && !url.starts_with("sqlite") {
        errors.push(ConfigError::Validation {
            message: format!("engine.url `{url}` is not a sqlite URL"),
        });
    }

    if config.engine.busy_timeout_ms > 600_000 {
        errors.push(ConfigError::Validation {
            message: format!(
                "engine.busy_timeout_ms must be at most 600000, got {}",
                config.engine.busy_timeout_ms
            ),
        });
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "logging.level `{}` is not one of {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &KeelsonConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&KeelsonConfig::default()).is_ok());
    }

    #[test]
    fn empty_url_fails() {
        let mut config = KeelsonConfig::default();
        config.engine.url = "  ".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("engine.url")));
    }

    #[test]
    fn foreign_scheme_fails() {
        let mut config = KeelsonConfig::default();
        config.engine.url = "postgresql://localhost/db".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("not a sqlite URL")));
    }

    #[test]
    fn bare_memory_target_is_accepted() {
        let mut config = KeelsonConfig::default();
        config.engine.url = ":memory:".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = KeelsonConfig::default();
        config.engine.url = String::new();
        config.engine.busy_timeout_ms = 1_000_000;
        config.logging.level = "loud".to_string();
        assert_eq!(messages(&config).len(), 3);
    }

    #[test]
    fn parsed_config_with_file_target_validates() {
        let toml_str = r#"
            [engine]
            url = "sqlite:///var/lib/keelson/app.db"
            echo = true

            [session]
            autoflush = false
        "#;
        let config: KeelsonConfig = toml::from_str(toml_str).unwrap();
        assert!(config.engine.echo);
        assert!(!config.session.autoflush);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected_by_the_parser() {
        let toml_str = r#"
            [engine]
            uri = "sqlite://"
        "#;
        let err = toml::from_str::<KeelsonConfig>(toml_str).unwrap_err();
        assert!(err.to_string().contains("uri"));
    }
}
