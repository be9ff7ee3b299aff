//! Job progress derived from persisted state.
//!
//! Each of the four pipeline steps is worth a quarter. Preprocessing fills
//! its quarter image by image; the remaining quarters are awarded as each
//! step commits.

use serde::Serialize;

use super::model::{Job, JobKind, JobStatus, JobStep};

const STEP_WEIGHT: f64 = 25.0;

/// Read-only progress snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub step: JobStep,
    pub percent: f64,
    pub processed_images: u32,
    pub total_images: u32,
    pub batches_completed: u32,
    pub total_batches: u32,
    pub error: Option<String>,
}

impl JobProgress {
    pub fn of(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            step: job.step,
            percent: percent(job),
            processed_images: job.processed_images,
            total_images: job.total_images,
            batches_completed: job.batches_completed,
            total_batches: job.total_batches,
            error: job.error.clone(),
        }
    }
}

/// Completion percentage in `0.0..=100.0`.
pub fn percent(job: &Job) -> f64 {
    if job.status == JobStatus::Done {
        return 100.0;
    }

    let value = match job.step {
        JobStep::Preprocessing => {
            if job.total_images == 0 {
                0.0
            } else {
                let ratio = f64::from(job.processed_images) / f64::from(job.total_images);
                let share = if job.kind == JobKind::Strip { 100.0 } else { STEP_WEIGHT };
                ratio.min(1.0) * share
            }
        }
        JobStep::BatchSubmitted => {
            if job.batch_output_id.is_some() {
                2.0 * STEP_WEIGHT + STEP_WEIGHT / 2.0
            } else {
                2.0 * STEP_WEIGHT
            }
        }
        JobStep::ResultsSaved => 3.0 * STEP_WEIGHT,
        JobStep::DocsBuilt => 4.0 * STEP_WEIGHT,
    };

    // Preprocessing of a strip job may reach 100 before the job is marked done.
    if job.kind == JobKind::Strip && job.step == JobStep::Preprocessing {
        value.min(99.0)
    } else {
        value
    }
}
