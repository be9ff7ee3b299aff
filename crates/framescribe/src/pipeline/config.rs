use std::path::PathBuf;
use std::time::Duration;

use crate::batch::RequestTemplate;
use crate::config::Config;
use crate::frame::FrameSettings;

/// Settings the pipeline needs, flattened out of [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scratch_directory: PathBuf,
    pub batch_size: usize,
    pub frame: FrameSettings,
    pub request: RequestTemplate,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Lifetime of the signed crop URLs handed to the batch service.
    pub url_ttl: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch_directory: PathBuf::from(&config.scratch_directory),
            batch_size: config.preprocess.batch_size,
            frame: config.preprocess.frame_settings(),
            request: RequestTemplate {
                model: config.batch.model.clone(),
                max_tokens: config.batch.max_tokens,
                prompt: config.batch.prompt().to_string(),
            },
            poll_interval: Duration::from_secs(config.batch.poll_interval_secs),
            max_poll_attempts: config.batch.max_poll_attempts,
            url_ttl: Duration::from_secs(config.storage.url_ttl_secs),
        }
    }
}
