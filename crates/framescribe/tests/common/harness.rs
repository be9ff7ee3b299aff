//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` owns a temporary object store, an in-memory database
//! and a fake batch service. `pipeline()` can be called repeatedly to get
//! fresh `Pipeline` values over the same state, which is how a process
//! restart is simulated.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use framescribe::config::load_config_from_str;
use framescribe::db::{frame_repo, Database};
use framescribe::pipeline::{NoopProgress, Pipeline, PipelineConfig, PipelineError};
use framescribe::storage::{FileStore, ObjectStore};
use framescribe::{Job, JobKind, UrlSigner};

use super::fakes::FakeBatchService;

pub const TEST_SIGNING_KEY: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

const TEST_CONFIG: &str = r#"{
    "version": "1.0",
    "database_path": "unused.db",
    "storage": { "root": "unused", "public_base_url": "https://files.test" },
    "preprocess": {
        "batch_size": 2,
        "target_width": 64,
        "target_height": 36,
        "thumbnail_width": 16,
        "thumbnail_height": 9
    },
    "batch": { "model": "test-model", "poll_interval_secs": 30, "max_poll_attempts": 5 }
}"#;

pub struct TestHarness {
    temp_dir: TempDir,
    pub store: Arc<FileStore>,
    pub db: Database,
    pub batch: Arc<FakeBatchService>,
    pub config: PipelineConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_batch(FakeBatchService::new())
    }

    pub fn with_batch(batch: FakeBatchService) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let signer = UrlSigner::from_hex_key(TEST_SIGNING_KEY).unwrap();
        let store = Arc::new(FileStore::new(
            temp_dir.path().join("objects"),
            "https://files.test",
            signer,
        ));

        let mut config = PipelineConfig::from_config(&load_config_from_str(TEST_CONFIG).unwrap());
        config.scratch_directory = temp_dir.path().join("scratch");

        Self {
            temp_dir,
            store,
            db: Database::open_in_memory().unwrap(),
            batch: Arc::new(batch),
            config,
        }
    }

    pub fn set_poll(&mut self, interval: Duration, max_attempts: u32) {
        self.config.poll_interval = interval;
        self.config.max_poll_attempts = max_attempts;
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.config.scratch_directory.clone()
    }

    /// A fresh pipeline over the harness state.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            Arc::new(self.config.clone()),
            self.db.clone(),
            self.store.clone(),
            self.batch.clone(),
        )
    }

    /// Uploads an archive and creates a job over it.
    pub fn create_job(&self, kind: JobKind, archive: &[u8]) -> Job {
        let key = format!("uploads/{}.zip", uuid::Uuid::new_v4());
        self.store.put(&key, archive).unwrap();
        self.pipeline().create_job("owner-1", kind, &key).unwrap()
    }

    pub async fn run(&self, job_id: &str) -> Result<Job, PipelineError> {
        self.pipeline().run(job_id, &NoopProgress).await
    }

    pub fn job(&self, job_id: &str) -> Job {
        self.pipeline().job(job_id).unwrap()
    }

    pub fn get(&self, key: &str) -> Vec<u8> {
        self.store.get(key).unwrap()
    }

    pub fn text_output(&self, job: &Job) -> String {
        String::from_utf8(self.get(job.text_key.as_deref().unwrap())).unwrap()
    }

    pub fn frame_count(&self, job_id: &str) -> u64 {
        frame_repo::count_by_job(&self.db, job_id).unwrap()
    }

    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.store.list(prefix).unwrap()
    }
}
