pub mod archive;
pub mod batch;
pub mod canonical;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod frame;
pub mod job;
pub mod pipeline;
pub mod reconcile;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use batch::{BatchService, OpenAiBatchClient};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, FramescribeError, ProcessError, Result, StorageError, WorkerError,
};
pub use job::{Job, JobKind, JobProgress, JobStatus, JobStep};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use secrets::{resolve_secret, SecretError, UrlSigner};
pub use storage::{FileStore, ObjectStore};
pub use worker::{JobOutcome, WorkerPool};
