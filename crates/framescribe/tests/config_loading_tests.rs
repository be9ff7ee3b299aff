//! Table-driven tests for configuration loading and validation.

use std::io::Write;

use framescribe::config::{load_config, load_config_from_str};
use framescribe::pipeline::PipelineConfig;
use framescribe::ConfigError;
use tempfile::NamedTempFile;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{
            "version": "1.0",
            "database_path": "/var/lib/framescribe/jobs.db",
            "storage": { "root": "/var/lib/framescribe/objects" }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "database_path": "jobs.db",
            "scratch_directory": "/tmp/framescribe",
            "worker_count": 4,
            "storage": {
                "root": "objects",
                "public_base_url": "https://cdn.example.com/files",
                "url_ttl_secs": 3600,
                "signing_key_env": "MY_SIGNING_KEY"
            },
            "preprocess": {
                "batch_size": 25,
                "target_width": 1280,
                "target_height": 720,
                "aspect_tolerance": 0.02,
                "roi_fraction": 0.3,
                "thumbnail_width": 160,
                "thumbnail_height": 90
            },
            "batch": {
                "base_url": "https://llm.internal/v1",
                "model": "vision-small",
                "max_tokens": 128,
                "prompt": "Read the subtitle.",
                "poll_interval_secs": 60,
                "max_poll_attempts": 100,
                "api_key_file": "/run/secrets/llm"
            }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "missing_storage",
        config_json: r#"{ "version": "1.0", "database_path": "jobs.db" }"#,
        should_succeed: false,
        expected_error: Some("storage"),
    },
    ConfigTestCase {
        name: "unknown_field",
        config_json: r#"{
            "version": "1.0",
            "database_path": "jobs.db",
            "storage": { "root": "objects" },
            "input_directory": "/input"
        }"#,
        should_succeed: false,
        expected_error: Some("input_directory"),
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{
            "version": "2.0",
            "database_path": "jobs.db",
            "storage": { "root": "objects" }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_batch_size",
        config_json: r#"{
            "version": "1.0",
            "database_path": "jobs.db",
            "storage": { "root": "objects" },
            "preprocess": { "batch_size": 0 }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "thumbnail_larger_than_canvas",
        config_json: r#"{
            "version": "1.0",
            "database_path": "jobs.db",
            "storage": { "root": "objects" },
            "preprocess": { "target_width": 100, "target_height": 100 }
        }"#,
        should_succeed: false,
        expected_error: Some("thumbnail must not be larger"),
    },
    ConfigTestCase {
        name: "non_http_base_url",
        config_json: r#"{
            "version": "1.0",
            "database_path": "jobs.db",
            "storage": { "root": "objects" },
            "batch": { "base_url": "ftp://example.com" }
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "invalid_json",
        config_json: r#"{ invalid json }"#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_json_config_loading() {
    for test_case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(test_case.config_json);

        if test_case.should_succeed {
            assert!(
                result.is_ok(),
                "Test '{}' should succeed but failed: {:?}",
                test_case.name,
                result.err()
            );
        } else {
            let err = match result {
                Ok(_) => panic!("Test '{}' should fail but succeeded", test_case.name),
                Err(e) => e.to_string(),
            };
            if let Some(expected) = test_case.expected_error {
                assert!(
                    err.contains(expected),
                    "Test '{}': expected error containing '{}', got '{}'",
                    test_case.name,
                    expected,
                    err
                );
            }
        }
    }
}

#[test]
fn test_full_config_flows_into_pipeline_settings() {
    let config = load_config_from_str(JSON_CONFIG_TESTS[1].config_json).unwrap();
    let pipeline = PipelineConfig::from_config(&config);

    assert_eq!(pipeline.batch_size, 25);
    assert_eq!(pipeline.frame.target_width, 1280);
    assert_eq!(pipeline.frame.thumbnail_height, 90);
    assert_eq!(pipeline.request.model, "vision-small");
    assert_eq!(pipeline.request.prompt, "Read the subtitle.");
    assert_eq!(pipeline.max_poll_attempts, 100);
    assert_eq!(pipeline.url_ttl.as_secs(), 3600);
}

#[test]
fn test_load_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", JSON_CONFIG_TESTS[0].config_json).unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.database_path, "/var/lib/framescribe/jobs.db");
}

#[test]
fn test_load_config_missing_file() {
    let result = load_config("/nonexistent/framescribe/config.json");
    assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
}
