use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks the rules the schema cannot express on its own.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.ocr.endpoint.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "ocr.endpoint must not be empty".to_string(),
        });
    }

    if config.dispatch.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "dispatch.batch_size must be at least 1".to_string(),
        });
    }

    if config.dispatch.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "dispatch.concurrency must be at least 1".to_string(),
        });
    }

    if !(50..=600).contains(&config.raster.dpi) {
        return Err(ConfigError::Validation {
            message: format!("raster.dpi must be between 50 and 600, got {}", config.raster.dpi),
        });
    }

    let ocr = &config.ocr;
    if !has_secret_source(
        ocr.api_key.as_deref(),
        ocr.api_key_file.as_deref(),
        ocr.api_key_env_var.as_deref(),
    ) {
        log::debug!("No OCR API key configured, requests will be sent unauthenticated");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextPredicateKind;
    use crate::raster::{ColorMode, PageEncoding};

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(
            r#"{ "version": "1.0", "ocr": { "endpoint": "http://localhost:8080/ocr" } }"#,
        )
        .unwrap();

        assert_eq!(config.ocr.endpoint, "http://localhost:8080/ocr");
        assert_eq!(config.ocr.request_timeout_secs, 120);
        assert_eq!(config.dispatch.batch_size, 10);
        assert_eq!(config.dispatch.concurrency, 3);
        assert_eq!(config.dispatch.wave_delay_ms, 1000);
        assert_eq!(config.dispatch.text_predicate, TextPredicateKind::Legible);
        assert_eq!(config.raster.dpi, 150);
        assert_eq!(config.raster.color_mode, ColorMode::Grayscale);
        assert_eq!(config.raster.max_dimension, Some(2000));
        assert!(config.storage.source_root.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let config = load_config_from_str(
            r#"
            {
                "version": "1.0",
                "ocr": {
                    "endpoint": "https://ocr.internal/v1/recognize",
                    "model": "vision-large",
                    "api_key_env_var": "OCR_API_KEY",
                    "request_timeout_secs": 60
                },
                "dispatch": {
                    "batch_size": 5,
                    "concurrency": 2,
                    "wave_delay_ms": 250,
                    "call_timeout_secs": 30,
                    "text_predicate": "non_empty"
                },
                "raster": {
                    "dpi": 300,
                    "color_mode": "color",
                    "encoding": "jpeg",
                    "max_dimension": null
                },
                "storage": {
                    "source_root": "/srv/uploads",
                    "database_path": "/var/lib/ocrflow/jobs.db"
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.ocr.model.as_deref(), Some("vision-large"));
        assert_eq!(config.dispatch.batch_size, 5);
        assert_eq!(config.dispatch.text_predicate, TextPredicateKind::NonEmpty);
        assert_eq!(config.raster.encoding, PageEncoding::Jpeg);
        assert_eq!(config.raster.max_dimension, None);
        assert_eq!(
            config.storage.database_path().unwrap(),
            std::path::PathBuf::from("/var/lib/ocrflow/jobs.db")
        );
    }

    #[test]
    fn test_missing_ocr_section_rejected() {
        let result = load_config_from_str(r#"{ "version": "1.0" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "ocr": { "endpoint": "http://x" }, "dispatch": { "batch_size": 0 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "ocr": { "endpoint": "http://x", "temperature": 0.2 } }"#,
        );
        match result {
            Err(ConfigError::SchemaValidation { errors }) => assert!(errors.contains("temperature")),
            other => panic!("Expected SchemaValidation, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_version_rejected() {
        let result =
            load_config_from_str(r#"{ "version": "2.0", "ocr": { "endpoint": "http://x" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_semantic_checks_without_schema() {
        let mut config = load_config_from_str(
            r#"{ "version": "1.0", "ocr": { "endpoint": "http://x" } }"#,
        )
        .unwrap();

        config.dispatch.concurrency = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));

        config.dispatch.concurrency = 1;
        config.raster.dpi = 10;
        assert!(validate_config(&config).is_err());

        config.raster.dpi = 150;
        config.ocr.endpoint = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/ocrflow.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
