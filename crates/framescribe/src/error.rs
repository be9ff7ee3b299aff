use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FramescribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Batch service error: {0}")]
    Batch(#[from] crate::batch::BatchError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to read archive: {0}")]
    Archive(String),

    #[error("Failed to decode image '{name}': {reason}")]
    ImageDecode { name: String, reason: String },

    #[error("Failed to encode image: {0}")]
    ImageEncode(String),

    #[error("Failed to build DOCX: {0}")]
    DocxProcessing(String),

    #[error("Failed to access scratch file '{path}': {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read object '{path}': {source}")]
    ReadObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write object '{path}': {source}")]
    WriteObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete object '{path}': {source}")]
    DeleteObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list objects under '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    #[error("Failed to sign URL: {0}")]
    Signing(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job {0} is already in flight")]
    AlreadyRunning(String),

    #[error("Worker state lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, FramescribeError>;
