use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::archive::{self, extract::batch_count, FilteredArchiveWriter, PlannedEntry};
use crate::batch::{manifest, BatchError, BatchService, BatchStatus, CropMeta};
use crate::canonical;
use crate::db::{frame_repo, job_repo, Database};
use crate::document::{self, render_docx, render_text};
use crate::error::ProcessError;
use crate::frame;
use crate::job::{Job, JobKind, JobProgress, JobStatus, JobStep};
use crate::reconcile;
use crate::storage::{keys, ObjectStore};

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

/// Drives jobs through their steps.
///
/// Every step rebuilds its working set from the job row and the object
/// store, so a job can be resumed by any process after a crash.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    db: Database,
    store: Arc<dyn ObjectStore>,
    batch: Arc<dyn BatchService>,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        db: Database,
        store: Arc<dyn ObjectStore>,
        batch: Arc<dyn BatchService>,
    ) -> Self {
        Self {
            config,
            db,
            store,
            batch,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Registers a PENDING job over an uploaded archive.
    pub fn create_job(
        &self,
        owner_id: &str,
        kind: JobKind,
        source_key: &str,
    ) -> Result<Job, PipelineError> {
        self.check_source(source_key)?;

        let job = Job::new(owner_id, kind, source_key);
        job_repo::insert(&self.db, &job)?;
        info!(job_id = %job.id, kind = %job.kind, "Created job");
        Ok(job)
    }

    pub fn job(&self, job_id: &str) -> Result<Job, PipelineError> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Rewinds a failed job so the next run resumes at `from_step`, or at
    /// the step it failed in.
    pub fn retry(&self, job_id: &str, from_step: Option<JobStep>) -> Result<Job, PipelineError> {
        let mut job = self.job(job_id)?;
        if job.status != JobStatus::Error {
            return Err(PipelineError::Precondition(format!(
                "job {} is {}; only failed jobs can be retried",
                job.id, job.status
            )));
        }
        self.check_source(&job.source_key)?;

        let step = from_step.unwrap_or(job.step);
        if step > job.step {
            return Err(PipelineError::Precondition(format!(
                "job {} only reached {}; it cannot be retried from {}",
                job.id, job.step, step
            )));
        }

        job.reset_to(step);
        job_repo::update(&self.db, &job)?;
        info!(job_id = %job.id, step = %step, "Job reset for retry");
        Ok(job)
    }

    /// Runs a job until it is DONE or a step fails.
    ///
    /// Step failures are written to the job row and come back as
    /// [`PipelineError::Recorded`]. DONE jobs return immediately; ERROR jobs
    /// must be retried first.
    pub async fn run(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<Job, PipelineError> {
        let job = self.job(job_id)?;
        match job.status {
            JobStatus::Done => {
                debug!(job_id = %job.id, "Job already done");
                return Ok(job);
            }
            JobStatus::Error => {
                return Err(PipelineError::Precondition(format!(
                    "job {} failed; retry it before running again",
                    job.id
                )));
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }

        let span = info_span!("pipeline", job_id = %job.id, kind = %job.kind);
        self.drive(job, progress).instrument(span).await
    }

    async fn drive(
        &self,
        mut job: Job,
        progress: &dyn ProgressReporter,
    ) -> Result<Job, PipelineError> {
        job.status = JobStatus::Processing;
        job.error = None;
        self.save(&mut job, progress)?;

        while job.status != JobStatus::Done {
            progress.report(ProgressEvent::Step {
                job_id: job.id.clone(),
                step: job.step,
            });

            let outcome = match job.step {
                JobStep::Preprocessing => {
                    self.preprocess(&mut job, progress)
                        .instrument(info_span!("preprocess"))
                        .await
                }
                JobStep::BatchSubmitted => {
                    self.collect_results(&mut job, progress)
                        .instrument(info_span!("collect_results"))
                        .await
                }
                JobStep::ResultsSaved => {
                    self.build_documents(&mut job, progress)
                        .instrument(info_span!("build_documents"))
                        .await
                }
                JobStep::DocsBuilt => self.finish(&mut job, progress),
            };

            if let Err(e) = outcome {
                return Err(self.record_failure(&job.id, e, progress));
            }
        }

        progress.report(ProgressEvent::Completed {
            job_id: job.id.clone(),
        });
        info!("Job completed");
        Ok(job)
    }

    // ============================================
    // PREPROCESSING
    // ============================================

    async fn preprocess(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        self.check_source(&job.source_key)?;

        let source = self.fetch_source(job)?;
        let entries = archive::scan(open_scratch(&source)?)?;
        if entries.is_empty() {
            return Err(PipelineError::Precondition(
                "archive contains no processable frames".to_string(),
            ));
        }

        if job.total_images == 0 {
            self.clear_workspace(&job.id)?;
            job.total_images = entries.len() as u32;
            job.total_batches = batch_count(entries.len(), self.config.batch_size) as u32;
            job.processed_images = 0;
            job.batches_completed = 0;
            self.save(job, progress)?;
            info!(
                frames = job.total_images,
                batches = job.total_batches,
                "Scanned archive"
            );
        } else if job.total_images as usize != entries.len() {
            return Err(PipelineError::Consistency(format!(
                "archive has {} processable frames, job recorded {}",
                entries.len(),
                job.total_images
            )));
        }

        let batches = archive::plan_batches(&entries, self.config.batch_size);
        if batches.len() != job.total_batches as usize {
            return Err(PipelineError::Consistency(format!(
                "planned {} batches, job recorded {}",
                batches.len(),
                job.total_batches
            )));
        }
        let owners = frame_owners(&batches);

        for (number, batch) in batches
            .iter()
            .enumerate()
            .skip(job.batches_completed as usize)
        {
            if let Some(key) = self.process_batch(job, &source, batch, &owners)? {
                job.thumbnail_key = Some(key);
            }
            job.processed_images += batch.len() as u32;
            job.batches_completed += 1;
            self.save(job, progress)?;
            debug!(
                batch = number + 1,
                total = job.total_batches,
                "Processed batch"
            );
            tokio::task::yield_now().await;
        }

        if let Err(e) = std::fs::remove_file(&source) {
            debug!("Could not remove scratch copy {}: {}", source.display(), e);
        }
        self.build_filtered_archive(job)?;

        if job.kind == JobKind::Strip {
            return self.finish(job, progress);
        }

        self.submit_batch(job).await?;
        job.step = JobStep::BatchSubmitted;
        self.save(job, progress)
    }

    /// Transforms one batch of frames. Returns the thumbnail key when this
    /// batch produced it.
    fn process_batch(
        &self,
        job: &Job,
        source: &Path,
        batch: &[PlannedEntry],
        owners: &HashSet<u32>,
    ) -> Result<Option<String>, PipelineError> {
        let settings = &self.config.frame;
        let mut thumbnail = None;

        archive::for_each_in_batch(open_scratch(source)?, batch, |planned, bytes| -> Result<(), PipelineError> {
            let name = &planned.entry.base_name;
            let frame = frame::transform(name, &bytes, settings)?;
            drop(bytes);

            self.store
                .put(&keys::crop_key(&job.id, planned.index, name), &frame.crop_png)?;

            if owners.contains(&planned.index) {
                let png = frame::encode_png(&frame.normalized)?;
                self.store
                    .put(&keys::frame_key(&job.id, &canonical::base_key(name)), &png)?;
            }

            if planned.index == 0 {
                thumbnail = self.write_thumbnail(job, &frame.normalized);
            }
            Ok(())
        })?;

        Ok(thumbnail)
    }

    /// Copies the source archive into the scratch directory, where it can be
    /// read through its central directory.
    fn fetch_source(&self, job: &Job) -> Result<PathBuf, PipelineError> {
        let scratch = self.scratch_dir(&job.id);
        std::fs::create_dir_all(&scratch).map_err(|e| ProcessError::Scratch {
            path: scratch.clone(),
            source: e,
        })?;
        let path = scratch.join("source.zip");
        let scratch_err = |e: std::io::Error| ProcessError::Scratch {
            path: path.clone(),
            source: e,
        };

        let mut reader = self.store.open(&job.source_key)?;
        let mut file = BufWriter::new(File::create(&path).map_err(scratch_err)?);
        let bytes = std::io::copy(&mut reader, &mut file).map_err(scratch_err)?;
        file.flush().map_err(scratch_err)?;
        debug!(bytes, "Fetched source archive");
        Ok(path)
    }

    fn write_thumbnail(&self, job: &Job, frame: &RgbImage) -> Option<String> {
        let key = keys::thumbnail_key(&job.id);
        let settings = &self.config.frame;

        let written = frame::thumbnail_jpeg(
            frame,
            settings.thumbnail_width,
            settings.thumbnail_height,
        )
        .map_err(PipelineError::from)
        .and_then(|jpeg| self.store.put(&key, &jpeg).map_err(PipelineError::from));

        match written {
            Ok(_) => Some(key),
            Err(e) => {
                warn!(error = %e, "Thumbnail generation failed");
                None
            }
        }
    }

    fn build_filtered_archive(&self, job: &mut Job) -> Result<(), PipelineError> {
        let mut frame_keys = self.store.list(&keys::frames_prefix(&job.id))?;
        frame_keys.sort_by(|a, b| {
            canonical::compare(canonical::file_name(a), canonical::file_name(b))
        });

        if frame_keys.is_empty() {
            if job.kind == JobKind::Strip {
                return Err(PipelineError::Precondition(
                    "archive has no primary frames to keep".to_string(),
                ));
            }
            debug!("No primary frames, skipping filtered archive");
            job.images_zip_key = None;
            job.images_zip_size = None;
            return Ok(());
        }

        let scratch = self.scratch_dir(&job.id);
        std::fs::create_dir_all(&scratch).map_err(|e| ProcessError::Scratch {
            path: scratch.clone(),
            source: e,
        })?;
        let path = scratch.join("images.zip");
        let scratch_err = |e: std::io::Error| ProcessError::Scratch {
            path: path.clone(),
            source: e,
        };

        let file = File::create(&path).map_err(scratch_err)?;
        let mut writer = FilteredArchiveWriter::new(BufWriter::new(file));
        for key in &frame_keys {
            let mut reader = self.store.open(key)?;
            writer.add(canonical::file_name(key), &mut reader)?;
        }
        let count = writer.len();
        writer.finish()?.flush().map_err(scratch_err)?;

        let zip_key = keys::images_zip_key(&job.id);
        let size = self.store.put_file(&zip_key, &path)?;
        if let Err(e) = std::fs::remove_file(&path) {
            debug!("Could not remove scratch archive {}: {}", path.display(), e);
        }

        job.images_zip_key = Some(zip_key);
        job.images_zip_size = Some(size);
        info!(frames = count, bytes = size, "Wrote filtered archive");
        Ok(())
    }

    // ============================================
    // BATCH SUBMISSION AND POLLING
    // ============================================

    async fn submit_batch(&self, job: &mut Job) -> Result<(), PipelineError> {
        let crops = self.list_crops(job)?;
        if crops.is_empty() {
            return Err(PipelineError::Precondition(
                "no crops to submit".to_string(),
            ));
        }
        if crops.len() != job.total_images as usize {
            return Err(PipelineError::Consistency(format!(
                "found {} crops for {} frames",
                crops.len(),
                job.total_images
            )));
        }

        if job.batch_id.is_some() || job.batch_input_id.is_some() {
            info!(batch_id = ?job.batch_id, "Batch already submitted");
            return Ok(());
        }

        let manifest = manifest::build(&job.id, &crops, &self.config.request)?;
        self.store.put(&keys::manifest_key(&job.id), &manifest)?;

        let input_id = self
            .batch
            .upload_manifest(&format!("{}.jsonl", job.id), manifest)
            .await?;
        let metadata = HashMap::from([("job_id".to_string(), job.id.clone())]);
        let created = self.batch.create_batch(&input_id, &metadata).await?;
        info!(batch_id = %created.id, requests = crops.len(), "Submitted batch");

        job.batch_input_id = Some(input_id);
        job.batch_id = Some(created.id);
        job.submitted_images = crops.len() as u32;
        job.clear_wait();
        Ok(())
    }

    fn list_crops(&self, job: &Job) -> Result<Vec<CropMeta>, PipelineError> {
        let mut crops = Vec::new();
        for key in self.store.list(&keys::crops_prefix(&job.id))? {
            let Some((index, filename)) = keys::parse_crop_key(&job.id, &key) else {
                debug!("Ignoring unexpected object {}", key);
                continue;
            };
            let url = self.store.signed_url(&key, self.config.url_ttl)?;
            crops.push(CropMeta {
                index,
                filename,
                key,
                url,
            });
        }
        crops.sort_by_key(|c| c.index);
        Ok(crops)
    }

    async fn collect_results(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let batch_id = job.batch_id.clone().ok_or_else(|| {
            PipelineError::Consistency("job has no batch id".to_string())
        })?;

        let output_id = match job.batch_output_id.clone() {
            Some(id) => id,
            None => {
                let id = self.await_batch(job, &batch_id, progress).await?;
                job.batch_output_id = Some(id.clone());
                job.clear_wait();
                self.save(job, progress)?;
                id
            }
        };

        let raw = self.batch.download_output(&output_id).await?;
        self.store.put(&keys::batch_output_key(&job.id), &raw)?;

        let reconciled = reconcile::parse_output(&job.id, &raw, job.total_images)?;
        let saved = frame_repo::replace_for_job(&self.db, &job.id, &reconciled.frames)?;
        info!(
            frames = saved,
            empty = reconciled.empty_frames,
            foreign = reconciled.foreign_lines,
            "Saved batch results"
        );

        job.step = JobStep::ResultsSaved;
        self.save(job, progress)
    }

    /// Polls until the batch completes and returns its output file id.
    ///
    /// The attempt counter and next wake-up time are persisted before each
    /// sleep, so a restarted process keeps the same schedule and budget.
    async fn await_batch(
        &self,
        job: &mut Job,
        batch_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<String, PipelineError> {
        let interval = chrono::Duration::from_std(self.config.poll_interval)
            .unwrap_or_else(|_| chrono::Duration::zero());

        loop {
            if let Some(delay) = job.wake_at.as_deref().and_then(remaining_until) {
                debug!(delay_secs = delay.as_secs(), "Waiting before next poll");
                tokio::time::sleep(delay).await;
            }

            let attempt = job.poll_attempts + 1;
            let wait_id = format!("wait-{}-{}-{}", job.id, batch_id, attempt);
            let info = self.batch.get_batch(batch_id).await?;
            debug!(wait_id = %wait_id, status = %info.status, "Polled batch");

            if info.status == BatchStatus::Completed {
                return info.output_file_id.ok_or_else(|| {
                    BatchError::MissingOutput {
                        batch_id: batch_id.to_string(),
                    }
                    .into()
                });
            }
            if info.status.is_fatal() {
                return Err(BatchError::Terminal {
                    batch_id: batch_id.to_string(),
                    status: info.status.to_string(),
                }
                .into());
            }
            if attempt >= self.config.max_poll_attempts {
                return Err(BatchError::PollBudgetExhausted {
                    batch_id: batch_id.to_string(),
                    attempts: attempt,
                }
                .into());
            }

            job.poll_attempts = attempt;
            job.wake_at = Some((Utc::now() + interval).to_rfc3339());
            self.save(job, progress)?;
        }
    }

    // ============================================
    // DOCUMENTS AND COMPLETION
    // ============================================

    async fn build_documents(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let frames = frame_repo::list_by_job(&self.db, &job.id)?;
        let paragraphs = document::assemble_paragraphs(&frames);
        if paragraphs.is_empty() {
            return Err(PipelineError::Consistency(format!(
                "no recognized text stored for job {}",
                job.id
            )));
        }

        let text = render_text(&paragraphs);
        let docx = render_docx(&paragraphs)?;

        let text_key = keys::text_key(&job.id);
        job.text_size = Some(self.store.put(&text_key, text.as_bytes())?);
        job.text_key = Some(text_key);

        let docx_key = keys::docx_key(&job.id);
        job.docx_size = Some(self.store.put(&docx_key, &docx)?);
        job.docx_key = Some(docx_key);

        info!(paragraphs = paragraphs.len(), "Rendered documents");
        self.finish(job, progress)
    }

    fn finish(&self, job: &mut Job, progress: &dyn ProgressReporter) -> Result<(), PipelineError> {
        job.step = JobStep::DocsBuilt;
        job.status = JobStatus::Done;
        job.completed_at = Some(Utc::now().to_rfc3339());
        job.clear_wait();
        self.save(job, progress)?;

        self.cleanup(job);
        Ok(())
    }

    /// Removes intermediates of a finished job. Failures are only logged.
    fn cleanup(&self, job: &Job) {
        let id = &job.id;
        let results = [
            self.store.delete_prefix(&keys::crops_prefix(id)).map(|_| ()),
            self.store.delete_prefix(&keys::frames_prefix(id)).map(|_| ()),
            self.store.delete(&keys::manifest_key(id)),
            self.store.delete(&keys::batch_output_key(id)),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            warn!(error = %e, "Workspace cleanup failed");
        }

        let scratch = self.scratch_dir(id);
        if scratch.exists() {
            if let Err(e) = std::fs::remove_dir_all(&scratch) {
                warn!("Could not remove scratch directory {}: {}", scratch.display(), e);
            }
        }
    }

    // ============================================
    // HELPERS
    // ============================================

    fn save(&self, job: &mut Job, progress: &dyn ProgressReporter) -> Result<(), PipelineError> {
        job.touch();
        job_repo::update(&self.db, job)?;
        progress.report(ProgressEvent::Progress(JobProgress::of(job)));
        Ok(())
    }

    /// Marks the job ERROR. Returns `error` unwrapped if that write fails.
    fn record_failure(
        &self,
        job_id: &str,
        error: PipelineError,
        progress: &dyn ProgressReporter,
    ) -> PipelineError {
        let message = error.to_string();
        warn!(error = %message, "Job failed");

        let mut job = match self.job(job_id) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Could not load job to record failure");
                return error;
            }
        };
        job.status = JobStatus::Error;
        job.error = Some(message.clone());
        job.touch();
        if let Err(e) = job_repo::update(&self.db, &job) {
            warn!(error = %e, "Could not record job failure");
            return error;
        }

        progress.report(ProgressEvent::Failed {
            job_id: job.id.clone(),
            error: message,
        });
        PipelineError::Recorded {
            job_id: job.id,
            step: job.step,
            source: Box::new(error),
        }
    }

    fn check_source(&self, key: &str) -> Result<(), PipelineError> {
        match self.store.size(key)? {
            None => Err(PipelineError::Precondition(format!(
                "source archive '{}' does not exist",
                key
            ))),
            Some(0) => Err(PipelineError::Precondition(format!(
                "source archive '{}' is empty",
                key
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Drops crops and frames left by an earlier attempt.
    fn clear_workspace(&self, job_id: &str) -> Result<(), PipelineError> {
        let crops = self.store.delete_prefix(&keys::crops_prefix(job_id))?;
        let frames = self.store.delete_prefix(&keys::frames_prefix(job_id))?;
        if crops + frames > 0 {
            debug!(crops, frames, "Cleared stale workspace");
        }
        Ok(())
    }

    fn scratch_dir(&self, job_id: &str) -> PathBuf {
        self.config.scratch_directory.join(job_id)
    }
}

fn open_scratch(path: &Path) -> Result<BufReader<File>, PipelineError> {
    let file = File::open(path).map_err(|e| ProcessError::Scratch {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(BufReader::new(file))
}

/// Indexes of the entries whose normalized frame goes into the filtered
/// archive: the first primary frame of each base key, in natural order.
fn frame_owners(batches: &[Vec<PlannedEntry>]) -> HashSet<u32> {
    let mut seen = HashSet::new();
    batches
        .iter()
        .flatten()
        .filter(|p| p.entry.include_in_final_archive)
        .filter(|p| seen.insert(canonical::base_key(&p.entry.base_name)))
        .map(|p| p.index)
        .collect()
}

/// Time left until an RFC3339 instant, or `None` once it has passed.
fn remaining_until(wake_at: &str) -> Option<Duration> {
    let wake = DateTime::parse_from_rfc3339(wake_at).ok()?.with_timezone(&Utc);
    (wake - Utc::now())
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::validate_processable_entry;

    fn planned(names: &[&str], batch_size: usize) -> Vec<Vec<PlannedEntry>> {
        let entries: Vec<_> = names
            .iter()
            .map(|n| validate_processable_entry(n).unwrap())
            .collect();
        archive::plan_batches(&entries, batch_size)
    }

    #[test]
    fn test_frame_owners_first_primary_wins() {
        let batches = planned(&["1.png", "01.png", "2.png", "2.1.png", "3-1.png"], 2);
        let owners = frame_owners(&batches);

        // "1.png" (index 0) owns base key 1; "01.png" collides.
        assert!(owners.contains(&0));
        assert!(!owners.contains(&1));
        assert!(owners.contains(&2));
        assert!(!owners.contains(&3));
        assert!(!owners.contains(&4));
        assert_eq!(owners.len(), 2);
    }

    #[test]
    fn test_remaining_until() {
        let past = (Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
        assert_eq!(remaining_until(&past), None);

        let future = (Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
        let left = remaining_until(&future).unwrap();
        assert!(left > Duration::from_secs(50) && left <= Duration::from_secs(60));

        assert_eq!(remaining_until("not a date"), None);
    }
}
