//! Batch completion service: the trait the pipeline talks to and an
//! OpenAI-compatible HTTP implementation (`/files`, `/batches`).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::BatchError;
use super::manifest::COMPLETIONS_ENDPOINT;

const COMPLETION_WINDOW: &str = "24h";
const MAX_ERROR_BODY_LENGTH: usize = 500;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Remote batch lifecycle as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    Other(String),
}

impl BatchStatus {
    pub fn from_api(value: &str) -> Self {
        match value {
            "validating" => BatchStatus::Validating,
            "in_progress" => BatchStatus::InProgress,
            "finalizing" => BatchStatus::Finalizing,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            "cancelling" => BatchStatus::Cancelling,
            "cancelled" => BatchStatus::Cancelled,
            other => BatchStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Other(value) => value,
        }
    }

    /// States the batch can never leave without producing output.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Failed | BatchStatus::Expired | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a remote batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInfo {
    pub id: String,
    pub status: BatchStatus,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
}

/// Operations the pipeline needs from a batch completion provider.
#[async_trait]
pub trait BatchService: Send + Sync {
    /// Uploads a manifest and returns its file id.
    async fn upload_manifest(&self, filename: &str, content: Vec<u8>) -> Result<String, BatchError>;

    /// Starts a batch over an uploaded manifest.
    async fn create_batch(
        &self,
        input_file_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<BatchInfo, BatchError>;

    async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, BatchError>;

    /// Downloads the raw JSONL output file.
    async fn download_output(&self, file_id: &str) -> Result<Vec<u8>, BatchError>;
}

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
}

impl From<BatchObject> for BatchInfo {
    fn from(obj: BatchObject) -> Self {
        Self {
            id: obj.id,
            status: BatchStatus::from_api(&obj.status),
            output_file_id: obj.output_file_id.filter(|id| !id.is_empty()),
            error_file_id: obj.error_file_id.filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Serialize)]
struct CreateBatchRequest<'a> {
    input_file_id: &'a str,
    endpoint: &'static str,
    completion_window: &'static str,
    #[serde(skip_serializing_if = "no_metadata")]
    metadata: &'a HashMap<String, String>,
}

fn no_metadata(metadata: &&HashMap<String, String>) -> bool {
    metadata.is_empty()
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// Client for an OpenAI-compatible batch API.
pub struct OpenAiBatchClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiBatchClient {
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, BatchError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(response: Response) -> Result<Response, BatchError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(BatchError::Api {
            status,
            body: truncate_body(&body),
        })
    }
}

#[async_trait]
impl BatchService for OpenAiBatchClient {
    async fn upload_manifest(&self, filename: &str, content: Vec<u8>) -> Result<String, BatchError> {
        let size = content.len();
        let part = Part::bytes(content)
            .file_name(filename.to_string())
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .client
            .post(self.url("files"))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = Self::check(response).await?.json().await?;

        info!("Uploaded manifest {} ({} bytes) as {}", filename, size, file.id);
        Ok(file.id)
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<BatchInfo, BatchError> {
        let request = CreateBatchRequest {
            input_file_id,
            endpoint: COMPLETIONS_ENDPOINT,
            completion_window: COMPLETION_WINDOW,
            metadata,
        };

        let response = self
            .client
            .post(self.url("batches"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;
        let batch: BatchObject = Self::check(response).await?.json().await?;

        info!("Created batch {} for input {}", batch.id, input_file_id);
        Ok(batch.into())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, BatchError> {
        let response = self
            .client
            .get(self.url(&format!("batches/{}", batch_id)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;
        let batch: BatchObject = Self::check(response).await?.json().await?;

        debug!("Batch {} is {}", batch.id, batch.status);
        Ok(batch.into())
    }

    async fn download_output(&self, file_id: &str) -> Result<Vec<u8>, BatchError> {
        let response = self
            .client
            .get(self.url(&format!("files/{}/content", file_id)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;

        debug!("Downloaded output file {} ({} bytes)", file_id, bytes.len());
        Ok(bytes.to_vec())
    }
}
