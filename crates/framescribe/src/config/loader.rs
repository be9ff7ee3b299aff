use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// `<config dir>/framescribe/config.json`, used when no path is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("framescribe").join("config.json"))
}

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

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.version != "1.0" {
        return invalid(format!("Unsupported config version: {}", config.version));
    }
    if config.worker_count == 0 {
        return invalid("worker_count must be at least 1".to_string());
    }

    let preprocess = &config.preprocess;
    if preprocess.batch_size == 0 {
        return invalid("preprocess.batch_size must be at least 1".to_string());
    }
    if !(preprocess.roi_fraction > 0.0 && preprocess.roi_fraction <= 1.0) {
        return invalid(format!(
            "preprocess.roi_fraction must be in (0, 1], got {}",
            preprocess.roi_fraction
        ));
    }
    if preprocess.thumbnail_width > preprocess.target_width
        || preprocess.thumbnail_height > preprocess.target_height
    {
        return invalid("thumbnail must not be larger than the target canvas".to_string());
    }

    let batch = &config.batch;
    if batch.poll_interval_secs == 0 || batch.max_poll_attempts == 0 {
        return invalid("batch polling interval and attempts must be positive".to_string());
    }
    if batch.api_key.is_none() && batch.api_key_file.is_none() && batch.api_key_env.is_none() {
        return invalid(
            "batch needs one of api_key, api_key_file or api_key_env".to_string(),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "version": "1.0",
        "database_path": "/var/lib/framescribe/jobs.db",
        "storage": { "root": "/var/lib/framescribe/objects" }
    }"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.preprocess.batch_size, 50);
        assert_eq!(config.preprocess.target_width, 1920);
        assert_eq!(config.preprocess.target_height, 1080);
        assert_eq!(config.preprocess.roi_fraction, 0.25);
        assert_eq!(config.batch.poll_interval_secs, 30);
        assert_eq!(config.batch.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(config.storage.signing_key_env, "FRAMESCRIBE_SIGNING_KEY");
        assert!(config.worker_count >= 1);
        assert!(config.batch.prompt().contains("<EMPTY>"));
    }

    #[test]
    fn test_full_config() {
        let config = load_config_from_str(
            r#"{
                "version": "1.0",
                "database_path": "jobs.db",
                "scratch_directory": "/tmp/fs",
                "worker_count": 2,
                "storage": {
                    "root": "objects",
                    "public_base_url": "https://cdn.example.com/o",
                    "url_ttl_secs": 3600,
                    "signing_key_env": "SIGNING"
                },
                "preprocess": { "batch_size": 10, "roi_fraction": 0.3 },
                "batch": {
                    "base_url": "https://llm.example.com/v1",
                    "model": "vision-small",
                    "prompt": "Read the subtitle.",
                    "max_poll_attempts": 5,
                    "api_key_file": "/run/secrets/key"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.preprocess.frame_settings().roi_fraction, 0.3);
        assert_eq!(config.batch.prompt(), "Read the subtitle.");
        assert_eq!(config.batch.max_poll_attempts, 5);
    }

    #[test]
    fn test_missing_storage_fails_schema() {
        let result = load_config_from_str(r#"{"version": "1.0", "database_path": "x.db"}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_field_fails_schema() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "database_path": "x.db", "storage": {"root": "o"}, "colour": "red"}"#,
        );
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_wrong_version_fails() {
        let result = load_config_from_str(
            r#"{"version": "2.0", "database_path": "x.db", "storage": {"root": "o"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_thumbnail_fails_validation() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "database_path": "x.db", "storage": {"root": "o"},
                "preprocess": {"target_width": 100, "target_height": 100, "thumbnail_width": 320}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(load_config(&path).is_ok());
        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
