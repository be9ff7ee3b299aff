use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::db::job_repo;
use crate::error::{FramescribeError, WorkerError};
use crate::pipeline::{Pipeline, ProgressReporter};
use crate::worker::job::JobOutcome;

const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of threads that run jobs by id.
///
/// Each worker owns a single-threaded tokio runtime. A job id is never
/// handed to two workers at once.
pub struct WorkerPool {
    job_sender: Sender<String>,
    result_receiver: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    pipeline: Arc<Pipeline>,
}

impl WorkerPool {
    /// Starts `worker_count` workers.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(
        pipeline: Arc<Pipeline>,
        progress: Arc<dyn ProgressReporter>,
        worker_count: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<String>(worker_count * 2);
        let (result_sender, result_receiver) = unbounded::<JobOutcome>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                jobs: job_receiver.clone(),
                results: result_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                in_flight: Arc::clone(&in_flight),
                pipeline: Arc::clone(&pipeline),
                progress: Arc::clone(&progress),
            };
            workers.push(thread::spawn(move || worker.run()));
        }

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
            in_flight,
            pipeline,
        }
    }

    /// Queues a job. Blocks while the queue is full.
    pub fn submit(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        {
            let mut in_flight = self.in_flight.lock().map_err(|_| WorkerError::LockPoisoned)?;
            if !in_flight.insert(job_id.to_string()) {
                return Err(WorkerError::AlreadyRunning(job_id.to_string()));
            }
        }

        if self.job_sender.send(job_id.to_string()).is_err() {
            if let Ok(mut in_flight) = self.in_flight.lock() {
                in_flight.remove(job_id);
            }
            return Err(WorkerError::ChannelClosed);
        }
        debug!("Queued job {}", job_id);
        Ok(())
    }

    /// Queues every PENDING or PROCESSING job that is not already in
    /// flight. Returns how many were queued.
    pub fn recover(&self) -> Result<usize, FramescribeError> {
        let jobs = job_repo::find_unfinished(self.pipeline.database())?;
        let mut queued = 0;
        for job in jobs {
            match self.submit(&job.id) {
                Ok(()) => queued += 1,
                Err(WorkerError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if queued > 0 {
            info!("Queued {} unfinished jobs", queued);
        }
        Ok(queued)
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(job_id))
            .unwrap_or(false)
    }

    pub fn try_recv_result(&self) -> Option<JobOutcome> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobOutcome> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Stops accepting jobs and interrupts running ones at their next
    /// await point.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker {
    id: usize,
    jobs: Receiver<String>,
    results: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    pipeline: Arc<Pipeline>,
    progress: Arc<dyn ProgressReporter>,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Worker {} could not start its runtime: {}", self.id, e);
                return;
            }
        };

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.jobs.recv_timeout(SHUTDOWN_CHECK_INTERVAL) {
                Ok(job_id) => {
                    debug!("Worker {} processing job {}", self.id, job_id);
                    let outcome = runtime.block_on(self.process(&job_id));

                    if let Ok(mut in_flight) = self.in_flight.lock() {
                        in_flight.remove(&job_id);
                    }
                    if let Err(e) = self.results.send(outcome) {
                        error!("Worker {} failed to send result: {}", self.id, e);
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} job channel disconnected", self.id);
                    break;
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, job_id: &str) -> JobOutcome {
        let shutdown = Arc::clone(&self.shutdown);
        let interrupted = async move {
            while !shutdown.load(Ordering::Relaxed) {
                tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL).await;
            }
        };

        tokio::select! {
            result = self.pipeline.run(job_id, self.progress.as_ref()) => {
                if let Err(e) = &result {
                    warn!("Job {} failed: {}", job_id, e);
                }
                JobOutcome::from_run(job_id, &result)
            }
            _ = interrupted => {
                info!("Job {} interrupted by shutdown", job_id);
                JobOutcome::interrupted(job_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};

    use async_trait::async_trait;
    use image::{ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use crate::batch::{BatchError, BatchInfo, BatchService};
    use crate::db::Database;
    use crate::job::{JobKind, JobStatus};
    use crate::pipeline::{NoopProgress, PipelineConfig};
    use crate::secrets::UrlSigner;
    use crate::storage::FileStore;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    /// Strip jobs never reach the batch service.
    struct Unreachable;

    #[async_trait]
    impl BatchService for Unreachable {
        async fn upload_manifest(&self, _: &str, _: Vec<u8>) -> Result<String, BatchError> {
            Err(BatchError::InvalidResponse("unreachable".into()))
        }
        async fn create_batch(
            &self,
            _: &str,
            _: &HashMap<String, String>,
        ) -> Result<BatchInfo, BatchError> {
            Err(BatchError::InvalidResponse("unreachable".into()))
        }
        async fn get_batch(&self, _: &str) -> Result<BatchInfo, BatchError> {
            Err(BatchError::InvalidResponse("unreachable".into()))
        }
        async fn download_output(&self, _: &str) -> Result<Vec<u8>, BatchError> {
            Err(BatchError::InvalidResponse("unreachable".into()))
        }
    }

    fn png(value: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        RgbImage::from_pixel(32, 18, Rgb([value, value, value]))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn frames_zip(names: &[&str]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (i, name) in names.iter().enumerate() {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(&png(i as u8 * 40)).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn pipeline(dir: &TempDir) -> Arc<Pipeline> {
        let signer = UrlSigner::from_hex_key(TEST_KEY).unwrap();
        let store = Arc::new(FileStore::new(dir.path().join("store"), "http://files", signer));
        let mut config = PipelineConfig::from_config(
            &crate::config::load_config_from_str(
                r#"{"version": "1.0", "database_path": "x.db", "storage": {"root": "s"}}"#,
            )
            .unwrap(),
        );
        config.scratch_directory = dir.path().join("scratch");
        config.frame.target_width = 64;
        config.frame.target_height = 36;
        config.frame.thumbnail_width = 16;
        config.frame.thumbnail_height = 9;

        Arc::new(Pipeline::new(
            Arc::new(config),
            Database::open_in_memory().unwrap(),
            store,
            Arc::new(Unreachable),
        ))
    }

    #[test]
    fn test_worker_pool_creation() {
        let dir = TempDir::new().unwrap();
        let pool = WorkerPool::new(pipeline(&dir), Arc::new(NoopProgress), 2);

        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(pool.submit("x"), Err(WorkerError::ChannelClosed)));
        pool.wait();
    }

    #[test]
    fn test_recover_runs_pending_strip_jobs() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        pipeline
            .store()
            .put("uploads/a.zip", &frames_zip(&["1.png", "2.png"]))
            .unwrap();
        pipeline
            .store()
            .put("uploads/b.zip", &frames_zip(&["5.png", "5.1.png"]))
            .unwrap();
        let a = pipeline.create_job("u", JobKind::Strip, "uploads/a.zip").unwrap();
        let b = pipeline.create_job("u", JobKind::Strip, "uploads/b.zip").unwrap();

        let pool = WorkerPool::new(Arc::clone(&pipeline), Arc::new(NoopProgress), 2);
        assert_eq!(pool.recover().unwrap(), 2);

        let mut done = Vec::new();
        for _ in 0..2 {
            let outcome = pool.recv_result_timeout(Duration::from_secs(30)).unwrap();
            assert!(outcome.success, "job failed: {:?}", outcome.error);
            done.push(outcome.job_id);
        }
        done.sort();
        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(done, expected);

        assert!(!pool.is_in_flight(&a.id));
        assert_eq!(pipeline.job(&a.id).unwrap().status, JobStatus::Done);
        assert_eq!(pool.recover().unwrap(), 0);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_failed_job_reports_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        // Only variants: nothing for the filtered archive.
        pipeline
            .store()
            .put("uploads/v.zip", &frames_zip(&["3.1.png"]))
            .unwrap();
        let job = pipeline.create_job("u", JobKind::Strip, "uploads/v.zip").unwrap();

        let pool = WorkerPool::new(Arc::clone(&pipeline), Arc::new(NoopProgress), 1);
        pool.submit(&job.id).unwrap();
        let outcome = pool.recv_result_timeout(Duration::from_secs(30)).unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, Some(JobStatus::Error));
        assert_eq!(pipeline.job(&job.id).unwrap().status, JobStatus::Error);

        pool.shutdown();
        pool.wait();
    }
}
