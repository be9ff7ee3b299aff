//! Batch request construction and the batch completion service client.

pub mod client;
pub mod custom_id;
pub mod error;
pub mod manifest;

pub use client::{BatchInfo, BatchService, BatchStatus, OpenAiBatchClient};
pub use custom_id::CustomId;
pub use error::BatchError;
pub use manifest::{CropMeta, RequestTemplate, DEFAULT_PROMPT, EMPTY_SENTINEL};
