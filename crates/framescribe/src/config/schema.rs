use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_PROMPT;
use crate::frame::FrameSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub database_path: String,
    pub storage: StorageConfig,
    #[serde(default = "default_scratch_directory")]
    pub scratch_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_scratch_directory() -> String {
    std::env::temp_dir()
        .join("framescribe")
        .to_string_lossy()
        .into_owned()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: String,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
    /// Environment variable holding the 64-hex-char URL signing key.
    #[serde(default = "default_signing_key_env")]
    pub signing_key_env: String,
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

fn default_url_ttl_secs() -> u64 {
    // Long enough to outlive the 24h completion window.
    48 * 60 * 60
}

fn default_signing_key_env() -> String {
    "FRAMESCRIBE_SIGNING_KEY".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    #[serde(default = "default_target_height")]
    pub target_height: u32,
    #[serde(default = "default_aspect_tolerance")]
    pub aspect_tolerance: f64,
    #[serde(default = "default_roi_fraction")]
    pub roi_fraction: f64,
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
}

fn default_batch_size() -> usize {
    50
}

fn default_target_width() -> u32 {
    1920
}

fn default_target_height() -> u32 {
    1080
}

fn default_aspect_tolerance() -> f64 {
    0.01
}

fn default_roi_fraction() -> f64 {
    0.25
}

fn default_thumbnail_width() -> u32 {
    320
}

fn default_thumbnail_height() -> u32 {
    180
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            target_width: default_target_width(),
            target_height: default_target_height(),
            aspect_tolerance: default_aspect_tolerance(),
            roi_fraction: default_roi_fraction(),
            thumbnail_width: default_thumbnail_width(),
            thumbnail_height: default_thumbnail_height(),
        }
    }
}

impl PreprocessConfig {
    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            target_width: self.target_width,
            target_height: self.target_height,
            aspect_tolerance: self.aspect_tolerance,
            roi_fraction: self.roi_fraction,
            thumbnail_width: self.thumbnail_width,
            thumbnail_height: self.thumbnail_height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    300
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_poll_attempts() -> u32 {
    // 25 hours at the default interval.
    3000
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            prompt: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            api_key: None,
            api_key_file: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl BatchConfig {
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT)
    }
}
